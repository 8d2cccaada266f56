use crate::error::{IngestError, Result};
use encoding_rs::{Encoding, GBK, UTF_8};
use epub::doc::{EpubDoc, NavPoint};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// 容器内的一个资源（XHTML、图片、样式等）
#[derive(Debug, Clone)]
pub struct Resource {
    /// 容器内的完整路径，例如 `OEBPS/Text/ch1.xhtml`
    pub path: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl Resource {
    pub fn new(path: impl Into<String>, mime: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: normalize_path(&path.into()),
            mime: mime.into(),
            data: data.into(),
        }
    }

    pub fn is_html(&self) -> bool {
        self.mime.contains("html") || self.path.ends_with(".xhtml") || self.path.ends_with(".html")
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

/// 导航文档中的一个节点，可以无限嵌套
#[derive(Debug, Clone, PartialEq)]
pub struct NavNode {
    pub label: String,
    /// 资源路径，可能带有 `#anchor`
    pub href: String,
    pub children: Vec<NavNode>,
}

impl NavNode {
    pub fn new(label: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            href: href.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<NavNode>) -> Self {
        self.children = children;
        self
    }

    fn from_nav_point(nav: &NavPoint) -> Self {
        Self {
            label: nav.label.trim().to_string(),
            href: normalize_path(&nav.content.to_string_lossy()),
            children: nav.children.iter().map(NavNode::from_nav_point).collect(),
        }
    }
}

/// 已打开的电子书容器
///
/// 打开时一次性读出所有资源，之后的分段、图片提取都只做内存查找
#[derive(Debug, Clone, Default)]
pub struct BookArchive {
    resources: BTreeMap<String, Resource>,
    spine: Vec<String>,
    toc: Vec<NavNode>,
    cover_path: Option<String>,
}

impl BookArchive {
    /// 从文件打开 EPUB
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| IngestError::Archive(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(bytes)
    }

    /// 从内存中的 EPUB 数据打开
    ///
    /// 容器损坏或无法解析时返回 `IngestError::Archive`，这是导入流程中唯一的致命错误
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let mut doc = EpubDoc::from_reader(Cursor::new(bytes))
            .map_err(|e| IngestError::Archive(format!("EPUB 解析错误: {}", e)))?;

        // 建立 id -> path 映射，spine 只记录 idref
        let mut id_to_path = HashMap::new();
        let mut cover_path = None;
        for (id, item) in doc.resources.iter() {
            let path = normalize_path(&item.path.to_string_lossy());
            if cover_path.is_none()
                && item.mime.starts_with("image/")
                && (id.to_lowercase().contains("cover") || path.to_lowercase().contains("cover"))
            {
                cover_path = Some(path.clone());
            }
            id_to_path.insert(id.clone(), (path, item.mime.clone()));
        }

        let mut resources = BTreeMap::new();
        let ids: Vec<String> = id_to_path.keys().cloned().collect();
        for id in ids {
            let Some((path, mime)) = id_to_path.get(&id).cloned() else {
                continue;
            };
            match doc.get_resource(&id) {
                Some((data, _)) => {
                    resources.insert(path.clone(), Resource { path, mime, data });
                }
                None => warn!("无法读取资源 {} ({})", id, path),
            }
        }

        let spine = doc
            .spine
            .iter()
            .filter_map(|item| id_to_path.get(&item.idref).map(|(path, _)| path.clone()))
            .collect();

        let toc = doc.toc.iter().map(NavNode::from_nav_point).collect::<Vec<_>>();
        debug!("EPUB 打开成功: {} 个资源, {} 个顶层目录项", resources.len(), toc.len());

        Ok(Self {
            resources,
            spine,
            toc,
            cover_path,
        })
    }

    /// 用已经准备好的资源构造容器（导入其他来源或测试时使用）
    pub fn from_parts(resources: Vec<Resource>, spine: Vec<String>, toc: Vec<NavNode>) -> Self {
        let cover_path = resources
            .iter()
            .find(|r| r.is_image() && r.path.to_lowercase().contains("cover"))
            .map(|r| r.path.clone());

        Self {
            resources: resources.into_iter().map(|r| (r.path.clone(), r)).collect(),
            spine: spine.iter().map(|p| normalize_path(p)).collect(),
            toc,
            cover_path,
        }
    }

    /// 嵌套的导航目录；没有导航文档时为空
    pub fn toc(&self) -> &[NavNode] {
        &self.toc
    }

    /// 按阅读顺序排列的资源路径
    pub fn spine(&self) -> &[String] {
        &self.spine
    }

    pub fn resource(&self, path: &str) -> Option<&Resource> {
        self.resources.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.resources.contains_key(path)
    }

    pub fn resource_paths(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn cover(&self) -> Option<&Resource> {
        self.cover_path.as_deref().and_then(|p| self.resources.get(p))
    }

    /// 以文本形式读取资源，自动处理编码
    pub fn read_text(&self, path: &str) -> Option<String> {
        self.resources.get(path).map(|r| decode_text(&r.data))
    }
}

/// 把路径统一成 `/` 分隔、无 `./` 前缀的形式
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// 检测编码并解码
///
/// 顺序：BOM -> XML/HTML 声明的 charset -> UTF-8 -> GBK
pub fn decode_text(bytes: &[u8]) -> String {
    let encoding = detect_encoding(bytes);
    let (content, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!("资源解码时出现错误 ({})，可能存在乱码", encoding.name());
    }
    content.into_owned()
}

fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _bom_length)) = Encoding::for_bom(bytes) {
        return encoding;
    }

    if let Some(encoding) = declared_encoding(bytes) {
        return encoding;
    }

    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }

    if looks_like_gbk(bytes) {
        return GBK;
    }

    UTF_8
}

fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    static CHARSET: OnceLock<Regex> = OnceLock::new();
    let re = CHARSET.get_or_init(|| {
        Regex::new(r#"(?i)(?:encoding|charset)\s*=\s*["']?([A-Za-z0-9_\-]+)"#).expect("charset regex")
    });

    let head = &bytes[..bytes.len().min(1024)];
    let head = String::from_utf8_lossy(head);
    let label = re.captures(&head)?.get(1)?.as_str().to_string();
    Encoding::for_label(label.as_bytes())
}

/// GBK 双字节特征：第一字节 0x81-0xFE，第二字节 0x40-0xFE
fn looks_like_gbk(bytes: &[u8]) -> bool {
    let mut gbk_pairs = 0;
    let mut total_pairs = 0;
    let mut i = 0;

    while i + 1 < bytes.len() {
        let b1 = bytes[i];
        let b2 = bytes[i + 1];
        if b1 < 0x80 {
            i += 1;
            continue;
        }
        total_pairs += 1;
        if (0x81..=0xFE).contains(&b1) && (0x40..=0xFE).contains(&b2) {
            gbk_pairs += 1;
            i += 2;
        } else {
            i += 1;
        }
    }

    total_pairs > 0 && (gbk_pairs as f32 / total_pairs as f32) > 0.5
}
