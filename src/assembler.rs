//! 章节组装与导入流程
//!
//! 目录条目按文档顺序逐个处理：分段 -> 图片重定位 -> 编号、解析父级 -> 落库。
//! 父条目总是先于子条目出现，所以 reference -> id 映射只需一遍即可建立

use crate::archive::BookArchive;
use crate::asset_manager::{AssetUploader, ImageRelocator};
use crate::chapter::{book_totals, delete_chapters_for_book, insert_chapter, NewChapter};
use crate::config::IngestOptions;
use crate::db::{self, BookMetadataSink};
use crate::error::{IngestError, Result};
use crate::parser::{count_words, hierarchy_entries, slugify, unique_slug, ContentSegmenter, EntrySource, SegmentedContent, TocEntry};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, info_span, warn};

/// 已落库的章节，供后续子条目解析父级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignedChapter {
    pub id: i64,
    pub chapter_number: i32,
    pub level: i32,
}

/// reference -> 已分配章节，仅在一次导入调用内有效
pub type ReferenceMap = HashMap<String, AssignedChapter>;

/// 被跳过的条目
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedEntry {
    pub reference: String,
    pub title: String,
    pub reason: String,
}

/// 导入结果
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub book_id: i64,
    /// "navigation" 或 "spine"
    pub source: String,
    pub chapter_count: usize,
    pub total_words: i64,
    pub images_uploaded: usize,
    pub cover_url: Option<String>,
    /// 失败的条目不会中止导入，但会在这里列出
    pub skipped: Vec<SkippedEntry>,
}

/// 章节组装器
///
/// 负责编号、父级解析、slug 去重和落库。编号只在章节成功写入后递增，
/// 因此一本书的章节编号总是连续的 1..N
pub struct ChapterAssembler<'c> {
    conn: &'c Connection,
    book_id: i64,
    next_number: i32,
    total_words: i64,
    /// 父章节 ID -> 该范围内已使用的 slug
    slugs: HashMap<Option<i64>, HashSet<String>>,
}

impl<'c> ChapterAssembler<'c> {
    pub fn new(conn: &'c Connection, book_id: i64) -> Self {
        Self {
            conn,
            book_id,
            next_number: 1,
            total_words: 0,
            slugs: HashMap::new(),
        }
    }

    /// 组装并保存一个条目
    ///
    /// # 参数
    /// - `entry`: 目录条目
    /// - `content`: 分段（及图片重定位）后的内容
    /// - `references`: 本次导入的 reference -> 章节映射，成功后写入本条目
    ///
    /// # 返回
    /// 新章节的 ID、编号和层级
    pub fn assemble(
        &mut self,
        entry: &TocEntry,
        content: &SegmentedContent,
        references: &mut ReferenceMap,
    ) -> Result<AssignedChapter> {
        let parent = entry
            .parent_reference
            .as_deref()
            .and_then(|reference| references.get(reference))
            .copied();
        if entry.parent_reference.is_some() && parent.is_none() {
            warn!("条目 {} 的父级未落库，作为顶层章节处理", entry.reference);
        }

        let parent_id = parent.map(|p| p.id);
        let level = parent.map_or(1, |p| p.level + 1);
        let chapter_number = self.next_number;

        let taken = self.slugs.entry(parent_id).or_default();
        let slug = unique_slug(&slugify(&entry.title), taken);
        let word_count = count_words(&content.text);

        let id = insert_chapter(
            self.conn,
            &NewChapter {
                book_id: self.book_id,
                chapter_number,
                title: &entry.title,
                slug: &slug,
                content: &content.text,
                html_content: &content.html,
                word_count,
                parent_id,
                chapter_level: level,
            },
        )?;

        taken.insert(slug);
        self.next_number += 1;
        self.total_words += word_count;

        let assigned = AssignedChapter {
            id,
            chapter_number,
            level,
        };
        references.insert(entry.reference.clone(), assigned);
        Ok(assigned)
    }

    pub fn chapter_count(&self) -> usize {
        (self.next_number - 1) as usize
    }

    pub fn total_words(&self) -> i64 {
        self.total_words
    }
}

/// 导入一本已打开的书
///
/// 单个条目的失败（资源缺失、写库失败）只记录并跳过；已写入的章节不会回滚
pub fn ingest_book(
    conn: &Connection,
    book_id: i64,
    archive: &BookArchive,
    uploader: &dyn AssetUploader,
    sink: &dyn BookMetadataSink,
    options: &IngestOptions,
) -> Result<IngestReport> {
    let _span = info_span!("ingest", book_id).entered();

    if options.replace_existing {
        let removed = delete_chapters_for_book(conn, book_id)?;
        if removed > 0 {
            info!("删除旧章节 {} 个", removed);
        }
    } else {
        // 不替换时已有章节原样保留，书籍统计也不动
        let (existing, _) = book_totals(conn, book_id)?;
        if existing > 0 {
            return Err(IngestError::AlreadyIngested(book_id));
        }
    }

    let (entries, source) = hierarchy_entries(archive);
    info!("目录条目 {} 个 ({:?})", entries.len(), source);

    let mut segmenter = ContentSegmenter::new(archive, &entries, &options.resource_prefixes);
    let mut relocator = ImageRelocator::new(archive, uploader, book_id);
    let mut assembler = ChapterAssembler::new(conn, book_id);
    let mut references = ReferenceMap::new();
    let mut skipped = Vec::new();

    let cover_url = if options.upload_cover { relocator.upload_cover() } else { None };
    if let Some(url) = &cover_url {
        sink.update_book_cover(book_id, url)?;
    }

    for entry in &entries {
        let mut content = match segmenter.segment(entry) {
            Ok(content) => content,
            Err(e) => {
                warn!("跳过条目 \"{}\" ({}): {}", entry.title, entry.reference, e);
                skipped.push(skip(entry, &e));
                continue;
            }
        };

        if options.relocate_images {
            content.html = relocator.relocate(&content.html, &content.resource_path);
        }

        if let Err(e) = assembler.assemble(entry, &content, &mut references) {
            warn!("保存章节失败 \"{}\" ({}): {}", entry.title, entry.reference, e);
            skipped.push(skip(entry, &e));
        }
    }

    sink.update_book_totals(book_id, assembler.chapter_count() as i64, assembler.total_words())?;

    info!(
        "导入完成: {} 章, {} 字, 跳过 {} 个条目",
        assembler.chapter_count(),
        assembler.total_words(),
        skipped.len()
    );

    Ok(IngestReport {
        book_id,
        source: match source {
            EntrySource::Navigation => "navigation".to_string(),
            EntrySource::Spine => "spine".to_string(),
        },
        chapter_count: assembler.chapter_count(),
        total_words: assembler.total_words(),
        images_uploaded: relocator.uploaded_count(),
        cover_url,
        skipped,
    })
}

fn skip(entry: &TocEntry, error: &dyn std::fmt::Display) -> SkippedEntry {
    SkippedEntry {
        reference: entry.reference.clone(),
        title: entry.title.clone(),
        reason: error.to_string(),
    }
}

/// 从文件导入
///
/// 同一路径已有书籍记录时复用它（整本替换），否则以文件名作为临时标题新建
pub fn ingest_file(
    conn: &Connection,
    path: &Path,
    title: Option<&str>,
    uploader: &dyn AssetUploader,
    options: &IngestOptions,
) -> Result<IngestReport> {
    // 容器打不开是致命错误，此时还没有写任何数据
    let archive = BookArchive::open(path)?;

    let path_str = path.to_string_lossy().to_string();
    let book_id = match db::find_book_by_path(conn, &path_str)? {
        Some(id) => id,
        None => {
            let filename = title.map(str::to_string).unwrap_or_else(|| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("未知书籍")
                    .to_string()
            });
            db::insert_book(conn, &filename, None, &path_str)?
        }
    };

    ingest_book(conn, book_id, &archive, uploader, conn, options)
}
