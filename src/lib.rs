pub mod annotation;
pub mod archive;
pub mod assembler;
pub mod asset_manager;
pub mod chapter;
pub mod config;
pub mod db;
pub mod error;
pub mod hierarchy;
pub mod import_queue;
pub mod parser;


pub use annotation::{hydrate_annotations, Annotation, AnnotationKind, ChapterAnchored, ChapterMeta};
pub use archive::BookArchive;
pub use assembler::{ingest_book, ingest_file, ChapterAssembler, IngestReport, SkippedEntry};
pub use asset_manager::{AssetUploader, HttpAssetUploader, ImageRelocator, LocalAssetStore};
pub use chapter::{Chapter, ChapterSummary};
pub use config::{Config, IngestOptions};
pub use error::{IngestError, Result};
pub use hierarchy::{breadcrumb, chapter_tree, navigation, ChapterLink, ChapterNavigation, ChapterNode};

use rusqlite::Connection;

/// 打开（必要时创建）配置中的数据库
pub fn open_database(config: &Config) -> Result<Connection> {
    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(db::init_db(&config.database_path)?)
}

/// 根据配置选择资产存储：设置了上传接口时走 HTTP，否则写本地目录
pub fn build_uploader(config: &Config) -> Box<dyn AssetUploader + Send + Sync> {
    match &config.assets.upload_endpoint {
        Some(endpoint) => Box::new(HttpAssetUploader::new(endpoint.clone())),
        None => Box::new(LocalAssetStore::new(
            config.assets.dir.clone(),
            config.assets.base_url.clone(),
        )),
    }
}
