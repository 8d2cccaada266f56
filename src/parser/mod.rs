// 子模块声明
pub mod segmenter;
pub mod text;
pub mod toc;

pub use segmenter::{ContentSegmenter, SegmentedContent};
pub use text::{count_words, slugify, unique_slug};
pub use toc::{extract_hierarchy, flat_entries, TocEntry};

use crate::archive::BookArchive;
use tracing::info;

/// 章节来源
///
/// 用于标识条目是来自导航目录还是退化的逐文件切分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    /// 导航文档（NCX / nav）
    Navigation,
    /// 没有导航文档，每个 spine 文件一章
    Spine,
}

/// 获取一本书的目录条目
///
/// 导航文档缺失或为空时退化为逐文件切分，所有条目都是顶层且没有父级
pub fn hierarchy_entries(archive: &BookArchive) -> (Vec<TocEntry>, EntrySource) {
    let entries = extract_hierarchy(archive.toc());
    if !entries.is_empty() {
        return (entries, EntrySource::Navigation);
    }

    info!("没有可用的导航目录，按 spine 逐文件切分");
    (flat_entries(archive), EntrySource::Spine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{NavNode, Resource};

    fn resources() -> Vec<Resource> {
        vec![
            Resource::new("a.xhtml", "application/xhtml+xml", "<html><body><h1>A</h1></body></html>"),
            Resource::new("b.xhtml", "application/xhtml+xml", "<html><body><h1>B</h1></body></html>"),
        ]
    }

    #[test]
    fn test_navigation_is_preferred() {
        let archive = BookArchive::from_parts(
            resources(),
            vec!["a.xhtml".into(), "b.xhtml".into()],
            vec![NavNode::new("Only A", "a.xhtml")],
        );
        let (entries, source) = hierarchy_entries(&archive);
        assert_eq!(source, EntrySource::Navigation);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Only A");
    }

    #[test]
    fn test_spine_fallback() {
        let archive = BookArchive::from_parts(resources(), vec!["a.xhtml".into(), "b.xhtml".into()], Vec::new());
        let (entries, source) = hierarchy_entries(&archive);
        assert_eq!(source, EntrySource::Spine);
        let titles: Vec<_> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
    }
}
