//! 章节层级读取服务
//!
//! 章节在库里是扁平的行，父级只是一个可选的 ID。目录树和面包屑都在读取时
//! 按需重建，不维护常驻的对象树

use crate::chapter::{get_summaries_by_book, get_summaries_by_numbers, get_summary_by_id, ChapterSummary};
use crate::error::{IngestError, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// 目录树节点
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChapterNode {
    pub id: i64,
    pub chapter_number: i32,
    pub title: String,
    pub slug: String,
    pub level: i32,
    pub word_count: i64,
    pub children: Vec<ChapterNode>,
}

/// 导航中引用的章节
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChapterLink {
    pub id: i64,
    pub chapter_number: i32,
    pub title: String,
    pub slug: String,
}

impl From<&ChapterSummary> for ChapterLink {
    fn from(summary: &ChapterSummary) -> Self {
        Self {
            id: summary.id,
            chapter_number: summary.chapter_number,
            title: summary.title.clone(),
            slug: summary.slug.clone(),
        }
    }
}

/// 章节导航信息
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChapterNavigation {
    pub current: ChapterLink,
    /// 编号 - 1，不受父子关系影响
    pub previous: Option<ChapterLink>,
    /// 编号 + 1，不受父子关系影响
    pub next: Option<ChapterLink>,
    pub parent: Option<ChapterLink>,
    pub grandparent_slug: Option<String>,
}

/// 从扁平行构建目录树
///
/// # 参数
/// - `rows`: 一本书的章节摘要，顺序不限
///
/// # 返回
/// 顶层节点列表；每层子节点按章节编号排序。声明的父章节不在 `rows` 中时，
/// 该章节作为顶层节点返回
pub fn build_tree(rows: &[ChapterSummary]) -> Vec<ChapterNode> {
    let mut sorted: Vec<&ChapterSummary> = rows.iter().collect();
    sorted.sort_by_key(|row| row.chapter_number);

    let ids: HashSet<i64> = sorted.iter().map(|row| row.id).collect();
    let mut children: HashMap<i64, Vec<&ChapterSummary>> = HashMap::new();
    let mut roots = Vec::new();

    for row in sorted {
        match row.parent_id {
            Some(parent_id) if parent_id != row.id && ids.contains(&parent_id) => {
                children.entry(parent_id).or_default().push(row);
            }
            _ => roots.push(row),
        }
    }

    roots.into_iter().map(|row| to_node(row, &children)).collect()
}

fn to_node(row: &ChapterSummary, children: &HashMap<i64, Vec<&ChapterSummary>>) -> ChapterNode {
    ChapterNode {
        id: row.id,
        chapter_number: row.chapter_number,
        title: row.title.clone(),
        slug: row.slug.clone(),
        level: row.chapter_level,
        word_count: row.word_count,
        children: children
            .get(&row.id)
            .map(|kids| kids.iter().map(|kid| to_node(kid, children)).collect())
            .unwrap_or_default(),
    }
}

/// 获取一本书的目录树
pub fn chapter_tree(conn: &Connection, book_id: i64) -> Result<Vec<ChapterNode>> {
    let rows = get_summaries_by_book(conn, book_id)?;
    Ok(build_tree(&rows))
}

/// 获取章节导航
///
/// 上一章/下一章一次查询取回；父章节和祖父章节各按 ID 查一次
pub fn navigation(conn: &Connection, book_id: i64, chapter_number: i32) -> Result<ChapterNavigation> {
    let previous_number = chapter_number.checked_sub(1);
    let next_number = chapter_number.checked_add(1);
    let numbers: Vec<i32> = [previous_number, Some(chapter_number), next_number]
        .into_iter()
        .flatten()
        .collect();
    let rows = get_summaries_by_numbers(conn, book_id, &numbers)?;
    let by_number: HashMap<i32, &ChapterSummary> = rows.iter().map(|row| (row.chapter_number, row)).collect();

    let current = by_number
        .get(&chapter_number)
        .copied()
        .ok_or_else(|| IngestError::ChapterNotFound(format!("book {} #{}", book_id, chapter_number)))?;

    let parent = match current.parent_id {
        Some(parent_id) => get_summary_by_id(conn, parent_id)?,
        None => None,
    };
    let grandparent_slug = match parent.as_ref().and_then(|p| p.parent_id) {
        Some(grandparent_id) => get_summary_by_id(conn, grandparent_id)?.map(|g| g.slug),
        None => None,
    };

    Ok(ChapterNavigation {
        current: current.into(),
        previous: previous_number
            .and_then(|n| by_number.get(&n))
            .map(|row| ChapterLink::from(*row)),
        next: next_number
            .and_then(|n| by_number.get(&n))
            .map(|row| ChapterLink::from(*row)),
        parent: parent.as_ref().map(ChapterLink::from),
        grandparent_slug,
    })
}

/// 在已加载的行中重建面包屑
///
/// 结果从顶层开始，以目标章节结束；目标不存在时返回空列表。
/// 父链中断（父章节不在 `rows` 中）或出现环时停在当前位置
pub fn breadcrumb_in(rows: &[ChapterSummary], chapter_id: i64) -> Vec<ChapterLink> {
    let by_id: HashMap<i64, &ChapterSummary> = rows.iter().map(|row| (row.id, row)).collect();
    let mut trail = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = by_id.get(&chapter_id).copied();

    while let Some(row) = cursor {
        if !seen.insert(row.id) {
            break;
        }
        trail.push(ChapterLink::from(row));
        cursor = row.parent_id.and_then(|id| by_id.get(&id).copied());
    }

    trail.reverse();
    trail
}

/// 从数据库重建面包屑
///
/// 沿父指针向上逐级查询；父章节编号总是更小，所以链一定终止
pub fn breadcrumb(conn: &Connection, chapter_id: i64) -> Result<Vec<ChapterLink>> {
    let current = get_summary_by_id(conn, chapter_id)?
        .ok_or_else(|| IngestError::ChapterNotFound(format!("id {}", chapter_id)))?;

    let mut seen = HashSet::from([current.id]);
    let mut trail = vec![ChapterLink::from(&current)];
    let mut parent_id = current.parent_id;

    while let Some(id) = parent_id {
        if !seen.insert(id) {
            break;
        }
        let Some(parent) = get_summary_by_id(conn, id)? else {
            break;
        };
        trail.push(ChapterLink::from(&parent));
        parent_id = parent.parent_id;
    }

    trail.reverse();
    Ok(trail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapter::test_support::{add_chapter, memory_db_with_book};

    fn summary(id: i64, number: i32, parent_id: Option<i64>, level: i32) -> ChapterSummary {
        ChapterSummary {
            id,
            book_id: 1,
            chapter_number: number,
            title: format!("Chapter {}", number),
            slug: format!("chapter-{}", number),
            word_count: 10,
            parent_id,
            chapter_level: level,
        }
    }

    #[test]
    fn test_build_tree_groups_by_parent() {
        let rows = vec![
            summary(13, 3, Some(11), 2),
            summary(11, 1, None, 1),
            summary(12, 2, Some(11), 2),
            summary(14, 4, Some(12), 3),
            summary(15, 5, None, 1),
        ];
        let tree = build_tree(&rows);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].id, 11);
        let kids: Vec<_> = tree[0].children.iter().map(|c| c.chapter_number).collect();
        assert_eq!(kids, vec![2, 3]);
        assert_eq!(tree[0].children[0].children[0].id, 14);
        assert!(tree[1].children.is_empty());
    }

    #[test]
    fn test_orphan_becomes_root() {
        let rows = vec![summary(1, 1, None, 1), summary(2, 2, Some(99), 2)];
        let tree = build_tree(&rows);
        assert_eq!(tree.iter().map(|n| n.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_breadcrumb_in_is_root_first() {
        let rows = vec![
            summary(1, 1, None, 1),
            summary(2, 2, Some(1), 2),
            summary(3, 3, Some(2), 3),
        ];
        let trail = breadcrumb_in(&rows, 3);
        assert_eq!(trail.iter().map(|l| l.id).collect::<Vec<_>>(), vec![1, 2, 3]);

        let root = breadcrumb_in(&rows, 1);
        assert_eq!(root.len(), 1);
        assert!(breadcrumb_in(&rows, 42).is_empty());
    }

    #[test]
    fn test_breadcrumb_in_stops_on_cycle() {
        let rows = vec![summary(1, 1, Some(2), 1), summary(2, 2, Some(1), 2)];
        let trail = breadcrumb_in(&rows, 2);
        assert_eq!(trail.len(), 2);
        assert_eq!(trail.last().unwrap().id, 2);
    }

    #[test]
    fn test_navigation_ignores_hierarchy() {
        let (conn, book_id) = memory_db_with_book();
        let mut ids = Vec::new();
        for number in 1..=10 {
            // 奇数章为顶层，偶数章挂在前一章下
            let parent = if number % 2 == 0 { ids.last().copied() } else { None };
            let level = if parent.is_some() { 2 } else { 1 };
            ids.push(add_chapter(&conn, book_id, number, parent, level));
        }

        let nav = navigation(&conn, book_id, 5).unwrap();
        assert_eq!(nav.current.chapter_number, 5);
        assert_eq!(nav.previous.unwrap().chapter_number, 4);
        assert_eq!(nav.next.unwrap().chapter_number, 6);
        assert!(nav.parent.is_none());

        let nav = navigation(&conn, book_id, 6).unwrap();
        assert_eq!(nav.parent.unwrap().id, ids[4]);

        let first = navigation(&conn, book_id, 1).unwrap();
        assert!(first.previous.is_none());
        let last = navigation(&conn, book_id, 10).unwrap();
        assert!(last.next.is_none());

        assert!(matches!(
            navigation(&conn, book_id, 11),
            Err(IngestError::ChapterNotFound(_))
        ));
    }

    #[test]
    fn test_navigation_at_number_limits() {
        let (conn, book_id) = memory_db_with_book();
        add_chapter(&conn, book_id, i32::MAX, None, 1);
        add_chapter(&conn, book_id, i32::MIN, None, 1);

        let last = navigation(&conn, book_id, i32::MAX).unwrap();
        assert_eq!(last.current.chapter_number, i32::MAX);
        assert!(last.next.is_none());

        let first = navigation(&conn, book_id, i32::MIN).unwrap();
        assert!(first.previous.is_none());
        assert!(navigation(&conn, book_id, i32::MAX - 1).is_err());
    }

    #[test]
    fn test_navigation_grandparent_slug() {
        let (conn, book_id) = memory_db_with_book();
        let part = add_chapter(&conn, book_id, 1, None, 1);
        let chapter = add_chapter(&conn, book_id, 2, Some(part), 2);
        add_chapter(&conn, book_id, 3, Some(chapter), 3);

        let nav = navigation(&conn, book_id, 3).unwrap();
        assert_eq!(nav.parent.unwrap().slug, "chapter-2");
        assert_eq!(nav.grandparent_slug.as_deref(), Some("chapter-1"));

        let nav = navigation(&conn, book_id, 2).unwrap();
        assert!(nav.grandparent_slug.is_none());
    }

    #[test]
    fn test_breadcrumb_from_db() {
        let (conn, book_id) = memory_db_with_book();
        let part = add_chapter(&conn, book_id, 1, None, 1);
        let chapter = add_chapter(&conn, book_id, 2, Some(part), 2);
        let section = add_chapter(&conn, book_id, 3, Some(chapter), 3);

        let trail = breadcrumb(&conn, section).unwrap();
        assert_eq!(trail.iter().map(|l| l.id).collect::<Vec<_>>(), vec![part, chapter, section]);
        assert_eq!(trail.last().unwrap().id, section);

        let rows = get_summaries_by_book(&conn, book_id).unwrap();
        assert_eq!(breadcrumb_in(&rows, section), trail);
        assert!(breadcrumb(&conn, section + 100).is_err());
    }

    #[test]
    fn test_chapter_tree_from_db() {
        let (conn, book_id) = memory_db_with_book();
        let part = add_chapter(&conn, book_id, 1, None, 1);
        add_chapter(&conn, book_id, 2, Some(part), 2);
        add_chapter(&conn, book_id, 3, None, 1);

        let tree = chapter_tree(&conn, book_id).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].level, 2);
    }
}
