use rusqlite::{Connection, OptionalExtension, Result};
use serde::Serialize;
use std::path::Path;

pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// 建表（幂等），内存数据库也走这里
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute("PRAGMA encoding = 'UTF-8'", [])?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            author TEXT,
            file_path TEXT NOT NULL UNIQUE,
            cover_image TEXT,
            total_chapters INTEGER NOT NULL DEFAULT 0,
            total_words INTEGER NOT NULL DEFAULT 0,
            added_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS chapters (
            id INTEGER PRIMARY KEY,
            book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
            chapter_number INTEGER NOT NULL,
            title TEXT NOT NULL,
            slug TEXT NOT NULL,
            content TEXT NOT NULL,
            html_content TEXT NOT NULL,
            word_count INTEGER NOT NULL DEFAULT 0,
            parent_id INTEGER REFERENCES chapters(id) ON DELETE SET NULL,
            chapter_level INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (book_id, chapter_number)
        );

        -- slug 在 (书, 父章节) 范围内唯一，顶层章节的 parent_id 为 NULL
        CREATE UNIQUE INDEX IF NOT EXISTS idx_chapters_slug_scope
            ON chapters (book_id, IFNULL(parent_id, 0), slug);
        CREATE INDEX IF NOT EXISTS idx_chapters_parent ON chapters (parent_id);",
    )?;

    Ok(())
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
    pub file_path: String,
    pub cover_image: Option<String>,
    pub total_chapters: i64,
    pub total_words: i64,
}

pub fn insert_book(conn: &Connection, title: &str, author: Option<&str>, file_path: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO books (title, author, file_path) VALUES (?1, ?2, ?3)",
        rusqlite::params![title, author, file_path],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 按文件路径查找书籍，重新导入同一文件时复用已有记录
pub fn find_book_by_path(conn: &Connection, file_path: &str) -> Result<Option<i64>> {
    conn.query_row("SELECT id FROM books WHERE file_path = ?1", [file_path], |row| row.get(0))
        .optional()
}

pub fn get_book(conn: &Connection, id: i64) -> Result<Option<Book>> {
    conn.query_row(
        "SELECT id, title, author, file_path, cover_image, total_chapters, total_words
         FROM books WHERE id = ?1",
        [id],
        |row| {
            Ok(Book {
                id: row.get(0)?,
                title: row.get(1)?,
                author: row.get(2)?,
                file_path: row.get(3)?,
                cover_image: row.get(4)?,
                total_chapters: row.get(5)?,
                total_words: row.get(6)?,
            })
        },
    )
    .optional()
}

pub fn set_book_cover(conn: &Connection, book_id: i64, cover_url: &str) -> Result<()> {
    conn.execute(
        "UPDATE books SET cover_image = ?1 WHERE id = ?2",
        rusqlite::params![cover_url, book_id],
    )?;
    Ok(())
}

/// 书籍聚合信息的写入方
///
/// 章节组装器不拥有书籍记录，只在导入结束时调用一次
pub trait BookMetadataSink {
    fn update_book_totals(&self, book_id: i64, total_chapters: i64, total_words: i64) -> crate::error::Result<()>;

    fn update_book_cover(&self, book_id: i64, cover_url: &str) -> crate::error::Result<()>;
}

impl BookMetadataSink for Connection {
    fn update_book_totals(&self, book_id: i64, total_chapters: i64, total_words: i64) -> crate::error::Result<()> {
        self.execute(
            "UPDATE books SET total_chapters = ?1, total_words = ?2 WHERE id = ?3",
            rusqlite::params![total_chapters, total_words, book_id],
        )?;
        Ok(())
    }

    fn update_book_cover(&self, book_id: i64, cover_url: &str) -> crate::error::Result<()> {
        set_book_cover(self, book_id, cover_url)?;
        Ok(())
    }
}
