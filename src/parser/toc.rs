use crate::archive::{BookArchive, NavNode};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 目录层级条目
///
/// 只在一次导入过程中存在，章节落库后即丢弃
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    /// 资源路径，可能带 `#anchor`
    pub reference: String,
    pub title: String,
    /// 嵌套深度，顶层为 1
    pub level: u32,
    /// 最近一层外围条目的 reference
    pub parent_reference: Option<String>,
}

impl TocEntry {
    pub fn new(reference: impl Into<String>, title: impl Into<String>, level: u32, parent: Option<&str>) -> Self {
        Self {
            reference: reference.into(),
            title: title.into(),
            level,
            parent_reference: parent.map(|p| p.to_string()),
        }
    }

    /// `#` 之前的资源路径
    pub fn resource_path(&self) -> &str {
        split_reference(&self.reference).0
    }

    /// `#` 之后的锚点
    pub fn anchor(&self) -> Option<&str> {
        split_reference(&self.reference).1
    }
}

pub fn split_reference(reference: &str) -> (&str, Option<&str>) {
    match reference.split_once('#') {
        Some((path, anchor)) if !anchor.is_empty() => (path, Some(anchor)),
        Some((path, _)) => (path, None),
        None => (reference, None),
    }
}

/// 深度优先遍历导航目录
///
/// 条目严格按文档顺序输出，父条目总是先于它的子条目；重复的 href 不去重
pub fn extract_hierarchy(nav: &[NavNode]) -> Vec<TocEntry> {
    let mut entries = Vec::new();
    walk(nav, 1, None, &mut entries);
    entries
}

fn walk(nodes: &[NavNode], level: u32, parent: Option<&str>, entries: &mut Vec<TocEntry>) {
    for node in nodes {
        if node.href.is_empty() {
            // 没有链接的分组标题：子条目挂到外层
            walk(&node.children, level, parent, entries);
            continue;
        }

        entries.push(TocEntry::new(node.href.clone(), title_or_fallback(&node.label, &node.href), level, parent));
        if !node.children.is_empty() {
            walk(&node.children, level + 1, Some(&node.href), entries);
        }
    }
}

fn title_or_fallback(label: &str, href: &str) -> String {
    let label = super::text::collapse_whitespace(label);
    if !label.is_empty() {
        return label;
    }
    Path::new(split_reference(href).0)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Untitled")
        .to_string()
}

/// 没有导航文档时的退化方案：每个 spine 中的 XHTML 资源一个平级章节
pub fn flat_entries(archive: &BookArchive) -> Vec<TocEntry> {
    archive
        .spine()
        .iter()
        .filter(|path| archive.resource(path).map_or(false, |r| r.is_html()))
        .enumerate()
        .map(|(i, path)| {
            let title = archive
                .read_text(path)
                .and_then(|html| extract_title_from_html(&html))
                .unwrap_or_else(|| format!("第 {} 章", i + 1));
            TocEntry::new(path.clone(), title, 1, None)
        })
        .collect()
}

/// 从 HTML 内容中提取章节标题
///
/// 优先从 h1-h6 标题标签提取，其次是 `<title>`
pub fn extract_title_from_html(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    for tag in &["h1", "h2", "h3", "h4", "h5", "h6", "title"] {
        if let Ok(selector) = Selector::parse(tag) {
            if let Some(element) = document.select(&selector).next() {
                let text = super::text::collapse_whitespace(&element.text().collect::<String>());
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Resource;

    fn nested_nav() -> Vec<NavNode> {
        vec![
            NavNode::new("Part I", "part1.xhtml").with_children(vec![
                NavNode::new("Chapter 1", "ch1.xhtml").with_children(vec![
                    NavNode::new("1.1", "ch1.xhtml#s1"),
                    NavNode::new("1.2", "ch1.xhtml#s2"),
                ]),
                NavNode::new("Chapter 2", "ch2.xhtml"),
            ]),
            NavNode::new("Appendix", "appendix.xhtml"),
        ]
    }

    #[test]
    fn test_document_order_and_levels() {
        let entries = extract_hierarchy(&nested_nav());
        let titles: Vec<_> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Part I", "Chapter 1", "1.1", "1.2", "Chapter 2", "Appendix"]);

        let levels: Vec<_> = entries.iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![1, 2, 3, 3, 2, 1]);
    }

    #[test]
    fn test_parent_references() {
        let entries = extract_hierarchy(&nested_nav());
        assert_eq!(entries[0].parent_reference, None);
        assert_eq!(entries[1].parent_reference.as_deref(), Some("part1.xhtml"));
        assert_eq!(entries[2].parent_reference.as_deref(), Some("ch1.xhtml"));
        assert_eq!(entries[4].parent_reference.as_deref(), Some("part1.xhtml"));
        assert_eq!(entries[5].parent_reference, None);
    }

    #[test]
    fn test_parent_always_precedes_child() {
        let entries = extract_hierarchy(&nested_nav());
        for (i, entry) in entries.iter().enumerate() {
            if let Some(parent) = &entry.parent_reference {
                assert!(entries[..i].iter().any(|e| &e.reference == parent));
            }
        }
    }

    #[test]
    fn test_duplicates_are_kept() {
        let nav = vec![NavNode::new("A", "ch1.xhtml"), NavNode::new("A again", "ch1.xhtml")];
        assert_eq!(extract_hierarchy(&nav).len(), 2);
    }

    #[test]
    fn test_empty_nav() {
        assert!(extract_hierarchy(&[]).is_empty());
    }

    #[test]
    fn test_group_heading_without_href() {
        let nav = vec![NavNode::new("Group", "").with_children(vec![NavNode::new("Inner", "a.xhtml")])];
        let entries = extract_hierarchy(&nav);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, 1);
        assert_eq!(entries[0].parent_reference, None);
    }

    #[test]
    fn test_reference_split() {
        let entry = TocEntry::new("Text/ch1.xhtml#s1", "S1", 2, Some("Text/ch1.xhtml"));
        assert_eq!(entry.resource_path(), "Text/ch1.xhtml");
        assert_eq!(entry.anchor(), Some("s1"));

        let entry = TocEntry::new("Text/ch1.xhtml#", "S1", 1, None);
        assert_eq!(entry.anchor(), None);
    }

    #[test]
    fn test_blank_label_uses_file_stem() {
        let entries = extract_hierarchy(&[NavNode::new("  ", "Text/preface.xhtml")]);
        assert_eq!(entries[0].title, "preface");
    }

    #[test]
    fn test_flat_entries_fallback() {
        let archive = BookArchive::from_parts(
            vec![
                Resource::new("a.xhtml", "application/xhtml+xml", "<html><body><h2>序言</h2></body></html>"),
                Resource::new("b.xhtml", "application/xhtml+xml", "<html><body><p>正文</p></body></html>"),
                Resource::new("style.css", "text/css", "p {}"),
            ],
            vec!["a.xhtml".into(), "style.css".into(), "b.xhtml".into()],
            Vec::new(),
        );

        let entries = flat_entries(&archive);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "序言");
        assert_eq!(entries[1].title, "第 2 章");
        assert!(entries.iter().all(|e| e.level == 1 && e.parent_reference.is_none()));
    }

    #[test]
    fn test_extract_title_from_html() {
        let html_h1 = r#"<html><body><h1>第一章</h1><p>内容</p></body></html>"#;
        assert_eq!(extract_title_from_html(html_h1), Some("第一章".to_string()));

        let html_title = r#"<html><head><title>书名</title></head><body><p>内容</p></body></html>"#;
        assert_eq!(extract_title_from_html(html_title), Some("书名".to_string()));

        let html_empty = r#"<html><body><p>内容</p></body></html>"#;
        assert_eq!(extract_title_from_html(html_empty), None);
    }
}
