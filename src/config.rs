use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 默认的资源路径前缀，按顺序尝试
pub const DEFAULT_RESOURCE_PREFIXES: &[&str] = &["OEBPS/", "OPS/", "EPUB/", "OEBPS/Text/", "Text/"];

/// 默认最多 3 本书同时导入
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// 全局配置
///
/// 从 TOML 文件读取，缺失的字段使用默认值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite 数据库路径
    pub database_path: PathBuf,
    pub assets: AssetConfig,
    pub ingest: IngestOptions,
}

/// 图片等资产的存储位置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// 本地资产目录
    pub dir: PathBuf,
    /// 返回给前端的 URL 前缀
    pub base_url: String,
    /// 远程上传接口；设置后使用 HTTP 上传而不是本地目录
    pub upload_endpoint: Option<String>,
}

/// 导入流程选项
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    pub resource_prefixes: Vec<String>,
    pub relocate_images: bool,
    pub upload_cover: bool,
    pub max_concurrent: usize,
    /// 重新导入时先删除已有章节
    pub replace_existing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("library.db"),
            assets: AssetConfig::default(),
            ingest: IngestOptions::default(),
        }
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("assets"),
            base_url: "/assets".to_string(),
            upload_endpoint: None,
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            resource_prefixes: DEFAULT_RESOURCE_PREFIXES.iter().map(|p| p.to_string()).collect(),
            relocate_images: true,
            upload_cover: true,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            replace_existing: true,
        }
    }
}

impl Config {
    /// 读取配置文件，文件不存在时返回默认配置
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| IngestError::Config(e.to_string()))
    }
}
