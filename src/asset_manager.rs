use crate::archive::{normalize_path, BookArchive, Resource};
use crate::error::{IngestError, Result};
use base64::{engine::general_purpose, Engine as _};
use regex::{Captures, Regex};
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 资产上传接口
///
/// 导入流程只依赖这个 trait：上传二进制数据，拿回一个可长期访问的 URL
pub trait AssetUploader {
    fn upload(&self, data: &[u8], target_id: &str) -> Result<String>;
}

/// 生成资产的目标 ID
///
/// 格式：`{book_id}/{hash}.{ext}`，hash 取 SHA256 前 16 位，同一内容只存一份
pub fn asset_target_id(book_id: i64, data: &[u8], original_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let hash = format!("{:x}", hasher.finalize());

    let ext = Path::new(original_path)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("png");

    format!("{}/{}.{}", book_id, &hash[..16], ext.to_lowercase())
}

/// 本地目录存储
///
/// 文件保存到 `{root}/{target_id}`，URL 为 `{base_url}/{target_id}`
pub struct LocalAssetStore {
    root: PathBuf,
    base_url: String,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    /// 获取资产的完整路径
    pub fn full_path(&self, target_id: &str) -> PathBuf {
        self.root.join(target_id)
    }
}

impl AssetUploader for LocalAssetStore {
    fn upload(&self, data: &[u8], target_id: &str) -> Result<String> {
        let file_path = self.full_path(target_id);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file_path, data)?;

        Ok(format!("{}/{}", self.base_url.trim_end_matches('/'), target_id))
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

/// 远程存储上传
///
/// `POST {endpoint}?key={target_id}`，请求体为原始字节，响应 `{"url": "..."}`
pub struct HttpAssetUploader {
    client: Client,
    endpoint: String,
}

impl HttpAssetUploader {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl AssetUploader for HttpAssetUploader {
    fn upload(&self, data: &[u8], target_id: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", target_id)])
            .body(data.to_vec())
            .send()?
            .error_for_status()?;

        let body: UploadResponse = response.json()?;
        if body.url.is_empty() {
            return Err(IngestError::Upload(format!("{} 返回了空 URL", target_id)));
        }
        Ok(body.url)
    }
}

/// 章节图片重定位
///
/// 把章节 HTML 里的 `<img src>` 换成上传后的 URL。
/// 单张图片失败只记录日志，原引用保持不变
pub struct ImageRelocator<'a> {
    archive: &'a BookArchive,
    uploader: &'a dyn AssetUploader,
    book_id: i64,
    /// target_id -> URL，同一内容在一次导入中只上传一次
    uploaded: HashMap<String, String>,
}

impl<'a> ImageRelocator<'a> {
    pub fn new(archive: &'a BookArchive, uploader: &'a dyn AssetUploader, book_id: i64) -> Self {
        Self {
            archive,
            uploader,
            book_id,
            uploaded: HashMap::new(),
        }
    }

    /// 已上传的不同图片数量
    pub fn uploaded_count(&self) -> usize {
        self.uploaded.len()
    }

    /// 重写一段章节 HTML 中的图片引用
    ///
    /// # 参数
    /// - `html`: 分段得到的章节 HTML
    /// - `resource_path`: 该 HTML 所在的资源路径，用于解析相对路径
    pub fn relocate(&mut self, html: &str, resource_path: &str) -> String {
        let sources = image_sources(html);
        if sources.is_empty() {
            return html.to_string();
        }

        let mut rewritten = html.to_string();
        for src in sources {
            if is_remote(&src) {
                continue;
            }

            let Some((data, name)) = self.payload_for(&src, resource_path) else {
                warn!("找不到图片 {} (引用自 {})，保留原引用", truncate(&src), resource_path);
                continue;
            };

            match self.upload_once(&data, &name) {
                Ok(url) => rewritten = replace_image_ref(&rewritten, &src, &url),
                Err(e) => warn!("上传图片失败 {}: {}", truncate(&src), e),
            }
        }

        rewritten
    }

    /// 上传封面，返回 URL
    pub fn upload_cover(&mut self) -> Option<String> {
        let cover = self.archive.cover()?;
        let data = cover.data.clone();
        let path = cover.path.clone();
        match self.upload_once(&data, &path) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("上传封面失败 {}: {}", path, e);
                None
            }
        }
    }

    fn upload_once(&mut self, data: &[u8], name: &str) -> Result<String> {
        let target_id = asset_target_id(self.book_id, data, name);
        if let Some(url) = self.uploaded.get(&target_id) {
            return Ok(url.clone());
        }

        let url = self.uploader.upload(data, &target_id)?;
        debug!("图片已上传: {} -> {}", name, url);
        self.uploaded.insert(target_id, url.clone());
        Ok(url)
    }

    /// 取得图片的二进制数据和用于推断扩展名的文件名
    fn payload_for(&self, src: &str, resource_path: &str) -> Option<(Vec<u8>, String)> {
        if src.starts_with("data:") {
            return decode_data_uri(src);
        }
        self.resolve_image(src, resource_path)
            .map(|resource| (resource.data.clone(), resource.path.clone()))
    }

    /// 依次尝试：相对于章节文件的路径 -> 容器根路径 -> 后缀扫描
    fn resolve_image(&self, src: &str, resource_path: &str) -> Option<&'a Resource> {
        let src = src.split(['#', '?']).next().unwrap_or(src).replace("%20", " ");
        let base_dir = match resource_path.rfind('/') {
            Some(i) => &resource_path[..i],
            None => "",
        };

        let relative = normalize_path(&format!("{}/{}", base_dir, src));
        if let Some(resource) = self.archive.resource(&relative) {
            return Some(resource);
        }

        let rooted = normalize_path(&src);
        if let Some(resource) = self.archive.resource(&rooted) {
            return Some(resource);
        }

        let tail = normalize_path(src.trim_start_matches("../"));
        let suffix = format!("/{}", tail);
        self.archive
            .resource_paths()
            .find(|path| path.ends_with(&suffix) || *path == tail)
            .and_then(|path| self.archive.resource(path))
    }
}

/// 章节 HTML 中所有不重复的图片地址，保持出现顺序
///
/// 包括 `<img src>` 和 SVG 里的 `<image href>` / `<image xlink:href>`
fn image_sources(html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(html);
    let selector = Selector::parse("img, image").expect("image selector");

    let mut seen = HashSet::new();
    fragment
        .select(&selector)
        .filter_map(|el| {
            let wanted = if el.value().name() == "img" { "src" } else { "href" };
            // xlink:href 解析后的本地名也是 href
            el.value()
                .attrs()
                .find(|(name, _)| *name == wanted)
                .map(|(_, value)| value)
        })
        .map(str::trim)
        .filter(|src| !src.is_empty() && seen.insert(src.to_string()))
        .map(str::to_string)
        .collect()
}

fn is_remote(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://") || src.starts_with("//")
}

/// 解析 `data:image/png;base64,....`
fn decode_data_uri(src: &str) -> Option<(Vec<u8>, String)> {
    let (header, payload) = src.strip_prefix("data:")?.split_once(',')?;
    let mime = header.split(';').next().unwrap_or("image/png");
    let ext = match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "image/webp" => "webp",
        _ => "png",
    };

    let data = if header.ends_with(";base64") {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        general_purpose::STANDARD.decode(compact).ok()?
    } else {
        payload.as_bytes().to_vec()
    };

    Some((data, format!("inline.{}", ext)))
}

/// 替换 `src` / `href` / `xlink:href` 中等于 `src` 的值
///
/// HTML 是 scraper 序列化出来的，属性值使用双引号并且 `&` 已被转义
fn replace_image_ref(html: &str, src: &str, url: &str) -> String {
    let escaped_src = html_escape::encode_double_quoted_attribute(src).into_owned();
    let url_attr = html_escape::encode_double_quoted_attribute(url).into_owned();

    let mut forms = vec![escaped_src];
    if forms[0] != src {
        forms.push(src.to_string());
    }

    let mut out = html.to_string();
    for form in forms {
        let pattern = format!(r#"(\b(?:src|xlink:href|href)\s*=\s*)"{}""#, regex::escape(&form));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        out = re
            .replace_all(&out, |caps: &Captures| format!("{}\"{}\"", &caps[1], url_attr))
            .into_owned();
    }
    out
}

fn truncate(src: &str) -> String {
    if src.chars().count() > 64 {
        format!("{}...", src.chars().take(64).collect::<String>())
    } else {
        src.to_string()
    }
}
