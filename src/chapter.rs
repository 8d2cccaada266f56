use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Result, Row};
use serde::{Deserialize, Serialize};

/// 章节
///
/// `parent_id` 只是对另一行的弱引用，父章节的 `chapter_number` 一定更小
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Chapter {
    pub id: i64,
    pub book_id: i64,
    /// 全书统一编号，从 1 开始，与嵌套无关
    pub chapter_number: i32,
    pub title: String,
    pub slug: String,
    /// 纯文本
    pub content: String,
    /// 渲染用的 HTML
    pub html_content: String,
    pub word_count: i64,
    pub parent_id: Option<i64>,
    /// 层级，顶层为 1
    pub chapter_level: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 不含正文的章节信息，目录树、导航、面包屑都只需要这些字段
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChapterSummary {
    pub id: i64,
    pub book_id: i64,
    pub chapter_number: i32,
    pub title: String,
    pub slug: String,
    pub word_count: i64,
    pub parent_id: Option<i64>,
    pub chapter_level: i32,
}

impl From<&Chapter> for ChapterSummary {
    fn from(chapter: &Chapter) -> Self {
        Self {
            id: chapter.id,
            book_id: chapter.book_id,
            chapter_number: chapter.chapter_number,
            title: chapter.title.clone(),
            slug: chapter.slug.clone(),
            word_count: chapter.word_count,
            parent_id: chapter.parent_id,
            chapter_level: chapter.chapter_level,
        }
    }
}

/// 待插入的章节
#[derive(Debug, Clone)]
pub struct NewChapter<'a> {
    pub book_id: i64,
    pub chapter_number: i32,
    pub title: &'a str,
    pub slug: &'a str,
    pub content: &'a str,
    pub html_content: &'a str,
    pub word_count: i64,
    pub parent_id: Option<i64>,
    pub chapter_level: i32,
}

const CHAPTER_COLUMNS: &str = "id, book_id, chapter_number, title, slug, content, html_content, word_count, parent_id, chapter_level, created_at, updated_at";
const SUMMARY_COLUMNS: &str = "id, book_id, chapter_number, title, slug, word_count, parent_id, chapter_level";

fn row_to_chapter(row: &Row) -> Result<Chapter> {
    Ok(Chapter {
        id: row.get(0)?,
        book_id: row.get(1)?,
        chapter_number: row.get(2)?,
        title: row.get(3)?,
        slug: row.get(4)?,
        content: row.get(5)?,
        html_content: row.get(6)?,
        word_count: row.get(7)?,
        parent_id: row.get(8)?,
        chapter_level: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn row_to_summary(row: &Row) -> Result<ChapterSummary> {
    Ok(ChapterSummary {
        id: row.get(0)?,
        book_id: row.get(1)?,
        chapter_number: row.get(2)?,
        title: row.get(3)?,
        slug: row.get(4)?,
        word_count: row.get(5)?,
        parent_id: row.get(6)?,
        chapter_level: row.get(7)?,
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// ==================== Chapter CRUD 操作 ====================

/// 创建章节，返回新章节 ID
pub fn insert_chapter(conn: &Connection, chapter: &NewChapter) -> Result<i64> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO chapters (book_id, chapter_number, title, slug, content, html_content,
                               word_count, parent_id, chapter_level, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        rusqlite::params![
            chapter.book_id,
            chapter.chapter_number,
            chapter.title,
            chapter.slug,
            chapter.content,
            chapter.html_content,
            chapter.word_count,
            chapter.parent_id,
            chapter.chapter_level,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 删除书籍的全部章节（重新导入时使用）
pub fn delete_chapters_for_book(conn: &Connection, book_id: i64) -> Result<usize> {
    conn.execute("DELETE FROM chapters WHERE book_id = ?1", [book_id])
}

/// 获取单个章节
pub fn get_chapter_by_id(conn: &Connection, chapter_id: i64) -> Result<Option<Chapter>> {
    conn.query_row(
        &format!("SELECT {} FROM chapters WHERE id = ?1", CHAPTER_COLUMNS),
        [chapter_id],
        row_to_chapter,
    )
    .optional()
}

pub fn get_chapter_by_number(conn: &Connection, book_id: i64, chapter_number: i32) -> Result<Option<Chapter>> {
    conn.query_row(
        &format!("SELECT {} FROM chapters WHERE book_id = ?1 AND chapter_number = ?2", CHAPTER_COLUMNS),
        rusqlite::params![book_id, chapter_number],
        row_to_chapter,
    )
    .optional()
}

/// 按 slug 查找；不同父级下可能有同名 slug，取编号最小的一个
pub fn get_chapter_by_slug(conn: &Connection, book_id: i64, slug: &str) -> Result<Option<Chapter>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM chapters WHERE book_id = ?1 AND slug = ?2 ORDER BY chapter_number LIMIT 1",
            CHAPTER_COLUMNS
        ),
        rusqlite::params![book_id, slug],
        row_to_chapter,
    )
    .optional()
}

/// 获取书籍的所有章节
pub fn get_chapters_by_book(conn: &Connection, book_id: i64) -> Result<Vec<Chapter>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM chapters WHERE book_id = ?1 ORDER BY chapter_number",
        CHAPTER_COLUMNS
    ))?;

    let chapters = stmt
        .query_map([book_id], row_to_chapter)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(chapters)
}

/// 获取书籍的所有章节摘要，按编号排序
pub fn get_summaries_by_book(conn: &Connection, book_id: i64) -> Result<Vec<ChapterSummary>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM chapters WHERE book_id = ?1 ORDER BY chapter_number",
        SUMMARY_COLUMNS
    ))?;

    let summaries = stmt
        .query_map([book_id], row_to_summary)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(summaries)
}

pub fn get_summary_by_id(conn: &Connection, chapter_id: i64) -> Result<Option<ChapterSummary>> {
    conn.query_row(
        &format!("SELECT {} FROM chapters WHERE id = ?1", SUMMARY_COLUMNS),
        [chapter_id],
        row_to_summary,
    )
    .optional()
}

/// 一次查询取回多个编号的章节摘要
pub fn get_summaries_by_numbers(conn: &Connection, book_id: i64, numbers: &[i32]) -> Result<Vec<ChapterSummary>> {
    if numbers.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {} FROM chapters WHERE book_id = ? AND chapter_number IN ({}) ORDER BY chapter_number",
        SUMMARY_COLUMNS,
        placeholders(numbers.len())
    );
    let params = std::iter::once(book_id).chain(numbers.iter().map(|n| i64::from(*n)));

    let mut stmt = conn.prepare(&sql)?;
    let summaries = stmt
        .query_map(params_from_iter(params), row_to_summary)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(summaries)
}

/// 一次查询取回多个 ID 的章节摘要
pub fn get_summaries_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<ChapterSummary>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {} FROM chapters WHERE id IN ({}) ORDER BY chapter_number",
        SUMMARY_COLUMNS,
        placeholders(ids.len())
    );

    let mut stmt = conn.prepare(&sql)?;
    let summaries = stmt
        .query_map(params_from_iter(ids.iter()), row_to_summary)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(summaries)
}

/// 书籍的章节数和总字数
pub fn book_totals(conn: &Connection, book_id: i64) -> Result<(i64, i64)> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(word_count), 0) FROM chapters WHERE book_id = ?1",
        [book_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let (conn, book_id) = memory_db_with_book();
        let id = insert_chapter(
            &conn,
            &NewChapter {
                book_id,
                chapter_number: 1,
                title: "第一章",
                slug: "第一章",
                content: "正文",
                html_content: "<p>正文</p>",
                word_count: 2,
                parent_id: None,
                chapter_level: 1,
            },
        )
        .unwrap();

        let chapter = get_chapter_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(chapter.title, "第一章");
        assert_eq!(chapter.word_count, 2);
        assert_eq!(chapter.parent_id, None);
        assert_eq!(chapter.created_at, chapter.updated_at);

        let by_number = get_chapter_by_number(&conn, book_id, 1).unwrap().unwrap();
        assert_eq!(by_number.id, id);
        let by_slug = get_chapter_by_slug(&conn, book_id, "第一章").unwrap().unwrap();
        assert_eq!(by_slug.id, id);
        assert!(get_chapter_by_id(&conn, id + 1).unwrap().is_none());
    }

    #[test]
    fn test_batched_lookups() {
        let (conn, book_id) = memory_db_with_book();
        let root = add_chapter(&conn, book_id, 1, None, 1);
        let child = add_chapter(&conn, book_id, 2, Some(root), 2);
        add_chapter(&conn, book_id, 3, None, 1);

        let by_numbers = get_summaries_by_numbers(&conn, book_id, &[3, 1]).unwrap();
        let numbers: Vec<_> = by_numbers.iter().map(|c| c.chapter_number).collect();
        assert_eq!(numbers, vec![1, 3]);

        let by_ids = get_summaries_by_ids(&conn, &[child]).unwrap();
        assert_eq!(by_ids.len(), 1);
        assert_eq!(by_ids[0].parent_id, Some(root));

        assert!(get_summaries_by_numbers(&conn, book_id, &[]).unwrap().is_empty());
        assert!(get_summaries_by_ids(&conn, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_slug_unique_within_parent_scope() {
        let (conn, book_id) = memory_db_with_book();
        let root = add_chapter(&conn, book_id, 1, None, 1);

        let new = |number: i32, parent_id: Option<i64>| NewChapter {
            book_id,
            chapter_number: number,
            title: "Notes",
            slug: "notes",
            content: "",
            html_content: "",
            word_count: 0,
            parent_id,
            chapter_level: if parent_id.is_some() { 2 } else { 1 },
        };

        assert!(insert_chapter(&conn, &new(2, Some(root))).is_ok());
        assert!(insert_chapter(&conn, &new(3, None)).is_ok());
        // 同一父级下重复
        assert!(insert_chapter(&conn, &new(4, Some(root))).is_err());
        assert!(insert_chapter(&conn, &new(5, None)).is_err());
    }

    #[test]
    fn test_delete_and_totals() {
        let (conn, book_id) = memory_db_with_book();
        let root = add_chapter(&conn, book_id, 1, None, 1);
        add_chapter(&conn, book_id, 2, Some(root), 2);

        assert_eq!(book_totals(&conn, book_id).unwrap(), (2, 2));
        assert_eq!(delete_chapters_for_book(&conn, book_id).unwrap(), 2);
        assert_eq!(book_totals(&conn, book_id).unwrap(), (0, 0));
        assert!(get_chapters_by_book(&conn, book_id).unwrap().is_empty());
    }
}
