//! 标注（书签、高亮、笔记）的章节信息批量填充
//!
//! 标注本身由别的模块存储，这里只关心它指向的章节编号

use crate::chapter::{get_summaries_by_ids, get_summaries_by_numbers};
use crate::error::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Bookmark,
    Highlight,
    Note,
}

/// 标注所在章节的展示信息
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChapterMeta {
    pub title: String,
    pub slug: String,
    pub level: i32,
    pub parent_slug: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: i64,
    pub kind: AnnotationKind,
    pub chapter_number: i32,
    pub text: Option<String>,
    /// 由 [`hydrate_annotations`] 填充
    pub chapter: Option<ChapterMeta>,
}

/// 指向某一章的记录
pub trait ChapterAnchored {
    fn chapter_number(&self) -> i32;

    fn attach_chapter(&mut self, meta: ChapterMeta);
}

impl ChapterAnchored for Annotation {
    fn chapter_number(&self) -> i32 {
        self.chapter_number
    }

    fn attach_chapter(&mut self, meta: ChapterMeta) {
        self.chapter = Some(meta);
    }
}

/// 批量获取章节信息
///
/// 固定两次查询：一次按编号取章节，一次按 ID 取这些章节的父章节
///
/// # 参数
/// - `numbers`: 去重后的章节编号
///
/// # 返回
/// 章节编号 -> 章节信息；不存在的编号不出现在结果中
pub fn chapter_meta_for_numbers(
    conn: &Connection,
    book_id: i64,
    numbers: &BTreeSet<i32>,
) -> Result<HashMap<i32, ChapterMeta>> {
    let numbers: Vec<i32> = numbers.iter().copied().collect();
    let chapters = get_summaries_by_numbers(conn, book_id, &numbers)?;

    let parent_ids: BTreeSet<i64> = chapters.iter().filter_map(|c| c.parent_id).collect();
    let parent_ids: Vec<i64> = parent_ids.into_iter().collect();
    let parent_slugs: HashMap<i64, String> = get_summaries_by_ids(conn, &parent_ids)?
        .into_iter()
        .map(|p| (p.id, p.slug))
        .collect();

    Ok(chapters
        .into_iter()
        .map(|c| {
            let meta = ChapterMeta {
                parent_slug: c.parent_id.and_then(|id| parent_slugs.get(&id).cloned()),
                title: c.title,
                slug: c.slug,
                level: c.chapter_level,
            };
            (c.chapter_number, meta)
        })
        .collect())
}

/// 给一组标注填充章节信息
///
/// 同一章的多条标注共用一次查询结果；找不到章节的标注保持不变
pub fn hydrate_annotations<T: ChapterAnchored>(conn: &Connection, book_id: i64, items: &mut [T]) -> Result<()> {
    let numbers: BTreeSet<i32> = items.iter().map(|item| item.chapter_number()).collect();
    if numbers.is_empty() {
        return Ok(());
    }

    let metas = chapter_meta_for_numbers(conn, book_id, &numbers)?;
    debug!("标注 {} 条, 涉及章节 {} 个, 命中 {} 个", items.len(), numbers.len(), metas.len());

    for item in items.iter_mut() {
        if let Some(meta) = metas.get(&item.chapter_number()) {
            item.attach_chapter(meta.clone());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapter::test_support::{add_chapter, memory_db_with_book};

    fn highlight(id: i64, chapter_number: i32) -> Annotation {
        Annotation {
            id,
            kind: AnnotationKind::Highlight,
            chapter_number,
            text: Some("被划线的句子".to_string()),
            chapter: None,
        }
    }

    #[test]
    fn test_duplicate_numbers_share_one_lookup() {
        let (conn, book_id) = memory_db_with_book();
        let part = add_chapter(&conn, book_id, 1, None, 1);
        add_chapter(&conn, book_id, 2, Some(part), 2);
        for number in 3..=5 {
            add_chapter(&conn, book_id, number, None, 1);
        }

        let mut items = vec![highlight(1, 2), highlight(2, 2), highlight(3, 5)];
        let numbers: BTreeSet<i32> = items.iter().map(|i| i.chapter_number).collect();
        let metas = chapter_meta_for_numbers(&conn, book_id, &numbers).unwrap();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[&2].parent_slug.as_deref(), Some("chapter-1"));
        assert_eq!(metas[&5].parent_slug, None);

        hydrate_annotations(&conn, book_id, &mut items).unwrap();
        assert!(items.iter().all(|i| i.chapter.is_some()));
        assert_eq!(items[0].chapter, items[1].chapter);
        assert_eq!(items[0].chapter.as_ref().unwrap().level, 2);
        assert_eq!(items[2].chapter.as_ref().unwrap().slug, "chapter-5");
    }

    #[test]
    fn test_unknown_chapter_left_empty() {
        let (conn, book_id) = memory_db_with_book();
        add_chapter(&conn, book_id, 1, None, 1);

        let mut items = vec![highlight(1, 1), highlight(2, 9)];
        hydrate_annotations(&conn, book_id, &mut items).unwrap();
        assert!(items[0].chapter.is_some());
        assert!(items[1].chapter.is_none());
    }

    #[test]
    fn test_empty_input() {
        let (conn, book_id) = memory_db_with_book();
        let mut items: Vec<Annotation> = Vec::new();
        assert!(hydrate_annotations(&conn, book_id, &mut items).is_ok());
        assert!(chapter_meta_for_numbers(&conn, book_id, &BTreeSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        let json = serde_json::to_string(&AnnotationKind::Bookmark).unwrap();
        assert_eq!(json, "\"bookmark\"");
    }
}
