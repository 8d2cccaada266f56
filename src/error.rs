use thiserror::Error;

/// 导入与读取过程中的错误
///
/// 只有 `Archive` 会中止整本书的导入，其余错误在条目边界被捕获
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("无法读取电子书容器: {0}")]
    Archive(String),
    #[error("找不到资源: {0}")]
    ResourceNotFound(String),
    #[error("找不到章节: {0}")]
    ChapterNotFound(String),
    #[error("书籍 {0} 已有章节，未开启替换")]
    AlreadyIngested(i64),
    #[error("上传失败: {0}")]
    Upload(String),
    #[error("配置错误: {0}")]
    Config(String),
    #[error("导入队列错误: {0}")]
    Queue(String),
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("HTTP错误: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
