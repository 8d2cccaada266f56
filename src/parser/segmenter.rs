use super::text::collapse_whitespace;
use super::toc::TocEntry;
use crate::archive::{normalize_path, BookArchive};
use crate::error::{IngestError, Result};
use ego_tree::{NodeId, NodeRef};
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// 分段结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedContent {
    /// 实际使用的资源路径（解析后）
    pub resource_path: String,
    /// 纯文本，段落之间空一行
    pub text: String,
    /// 原始标记片段
    pub html: String,
}

/// 内容分段器
///
/// 多个目录条目可能共享同一个物理文件，这时按锚点切分：
/// 从本条目的锚点开始向后收集，遇到同一文件中任何其他已知锚点即停止
pub struct ContentSegmenter<'a> {
    archive: &'a BookArchive,
    prefixes: Vec<String>,
    /// 解析后的资源路径 -> 该资源上所有条目的锚点
    anchors: HashMap<String, HashSet<String>>,
    /// 已解析的文档，同一资源只解析一次
    documents: HashMap<String, Html>,
}

impl<'a> ContentSegmenter<'a> {
    /// 创建分段器并登记所有条目的锚点
    ///
    /// # 参数
    /// - `archive`: 已打开的容器
    /// - `entries`: 完整的目录条目列表（用于确定每个资源上的锚点边界）
    /// - `prefixes`: 资源解析时依次尝试的路径前缀
    pub fn new(archive: &'a BookArchive, entries: &[TocEntry], prefixes: &[String]) -> Self {
        let mut segmenter = Self {
            archive,
            prefixes: prefixes.to_vec(),
            anchors: HashMap::new(),
            documents: HashMap::new(),
        };

        for entry in entries {
            let Some(anchor) = entry.anchor() else {
                continue;
            };
            if let Some(path) = segmenter.resolve_resource(entry.resource_path()) {
                segmenter.anchors.entry(path).or_default().insert(anchor.to_string());
            }
        }

        segmenter
    }

    /// 解析资源路径
    ///
    /// 顺序：精确匹配 -> 常见前缀 -> 后缀扫描
    pub fn resolve_resource(&self, reference_path: &str) -> Option<String> {
        let path = normalize_path(reference_path);
        if path.is_empty() {
            return None;
        }
        if self.archive.contains(&path) {
            return Some(path);
        }

        for prefix in &self.prefixes {
            let prefixed = normalize_path(&format!("{}{}", prefix, path));
            if self.archive.contains(&prefixed) {
                return Some(prefixed);
            }
            let prefix = normalize_path(prefix);
            if let Some(stripped) = path.strip_prefix(&format!("{}/", prefix)) {
                if self.archive.contains(stripped) {
                    return Some(stripped.to_string());
                }
            }
        }

        let suffix = format!("/{}", path);
        self.archive
            .resource_paths()
            .find(|candidate| candidate.ends_with(&suffix) || path.ends_with(&format!("/{}", candidate)))
            .map(|candidate| candidate.to_string())
    }

    /// 提取一个条目对应的内容
    ///
    /// 资源找不到时返回 `ResourceNotFound`，由调用方跳过该条目
    pub fn segment(&mut self, entry: &TocEntry) -> Result<SegmentedContent> {
        let path = self
            .resolve_resource(entry.resource_path())
            .ok_or_else(|| IngestError::ResourceNotFound(entry.reference.clone()))?;

        if !self.documents.contains_key(&path) {
            let source = self
                .archive
                .read_text(&path)
                .ok_or_else(|| IngestError::ResourceNotFound(path.clone()))?;
            self.documents.insert(path.clone(), Html::parse_document(&source));
        }
        let document = &self.documents[&path];

        let empty = HashSet::new();
        let known = self.anchors.get(&path).unwrap_or(&empty);
        let boundaries: HashSet<&str> = known
            .iter()
            .map(String::as_str)
            .filter(|a| Some(*a) != entry.anchor())
            .collect();

        let body = *body_of(document);
        let mut out = Collector::default();

        match entry.anchor() {
            Some(anchor) => match find_anchor(body, anchor) {
                Some(start) => {
                    let start = promote_inline_anchor(start, body.id(), &boundaries);
                    collect_from(start, body.id(), &boundaries, &mut out);
                }
                None => {
                    warn!("资源 {} 中找不到锚点 #{}，使用整个文件", path, anchor);
                    for child in body.children() {
                        emit(child, &HashSet::new(), &mut out);
                    }
                }
            },
            None => {
                for child in body.children() {
                    if emit(child, &boundaries, &mut out) {
                        break;
                    }
                }
            }
        }

        debug!("分段完成: {} -> {} 字节标记", entry.reference, out.html.len());
        Ok(out.finish(path))
    }
}

fn body_of(document: &Html) -> ElementRef<'_> {
    let selector = Selector::parse("body").expect("body selector");
    document.select(&selector).next().unwrap_or_else(|| document.root_element())
}

fn find_anchor<'d>(body: NodeRef<'d, Node>, anchor: &str) -> Option<NodeRef<'d, Node>> {
    body.descendants().find(|node| {
        node.value().as_element().map_or(false, |el| {
            el.id() == Some(anchor) || (el.name() == "a" && el.attr("name") == Some(anchor))
        })
    })
}

fn is_boundary(node: NodeRef<'_, Node>, boundaries: &HashSet<&str>) -> bool {
    let Some(el) = node.value().as_element() else {
        return false;
    };
    el.id().map_or(false, |id| boundaries.contains(id))
        || (el.name() == "a" && el.attr("name").map_or(false, |name| boundaries.contains(name)))
}

fn contains_boundary(node: NodeRef<'_, Node>, boundaries: &HashSet<&str>) -> bool {
    !boundaries.is_empty() && node.descendants().skip(1).any(|d| is_boundary(d, boundaries))
}

/// `<h2><a id="s1"/>标题</h2>` 这类写法：锚点是行内元素且位于父元素开头时，从父元素开始
fn promote_inline_anchor<'d>(
    mut start: NodeRef<'d, Node>,
    body_id: NodeId,
    boundaries: &HashSet<&str>,
) -> NodeRef<'d, Node> {
    while let Some(parent) = start.parent() {
        let inline = start
            .value()
            .as_element()
            .map_or(false, |el| is_inline(el.name()));
        if !inline || parent.id() == body_id || is_boundary(parent, boundaries) || has_leading_content(start) {
            break;
        }
        start = parent;
    }
    start
}

fn has_leading_content(node: NodeRef<'_, Node>) -> bool {
    node.prev_siblings().any(|sib| match sib.value() {
        Node::Text(text) => !text.trim().is_empty(),
        Node::Element(_) => true,
        _ => false,
    })
}

/// 从起点开始向后遍历兄弟节点，兄弟用完后回到父节点继续，直到遇到边界或 body 结束
fn collect_from(start: NodeRef<'_, Node>, body_id: NodeId, boundaries: &HashSet<&str>, out: &mut Collector) {
    if emit(start, boundaries, out) {
        return;
    }

    let mut cursor = start;
    loop {
        for sibling in cursor.next_siblings() {
            if emit(sibling, boundaries, out) {
                return;
            }
        }
        match cursor.parent() {
            Some(parent) if parent.id() != body_id => cursor = parent,
            _ => return,
        }
    }
}

/// 输出一个节点；碰到边界返回 true
///
/// 包含边界的元素不整体输出，而是进入其子节点只输出边界之前的部分
fn emit(node: NodeRef<'_, Node>, boundaries: &HashSet<&str>, out: &mut Collector) -> bool {
    match node.value() {
        Node::Text(text) => {
            out.push_text(text);
            false
        }
        Node::Element(el) => {
            if is_boundary(node, boundaries) {
                return true;
            }
            if is_skipped(el.name()) {
                return false;
            }
            if contains_boundary(node, boundaries) {
                // 只输出边界之前的子节点，但保留外层标签
                out.open(el);
                for child in node.children() {
                    if emit(child, boundaries, out) {
                        break;
                    }
                }
                out.close(el);
                return true;
            }
            if let Some(el) = ElementRef::wrap(node) {
                out.push_element(el);
            }
            false
        }
        _ => false,
    }
}

/// 脚本和样式不属于正文
fn is_skipped(name: &str) -> bool {
    matches!(name, "script" | "style")
}

fn is_inline(name: &str) -> bool {
    matches!(
        name,
        "a" | "span" | "em" | "strong" | "b" | "i" | "u" | "small" | "sup" | "sub" | "code" | "font"
    )
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "aside"
            | "header"
            | "footer"
            | "blockquote"
            | "pre"
            | "ul"
            | "ol"
            | "li"
            | "table"
            | "tr"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "figure"
            | "figcaption"
            | "dl"
            | "dt"
            | "dd"
            | "hr"
    )
}

#[derive(Default)]
struct Collector {
    html: String,
    text: String,
}

impl Collector {
    fn push_text(&mut self, text: &str) {
        self.html.push_str(&html_escape::encode_text(text));
        self.text.push_str(text);
    }

    fn open(&mut self, el: &Element) {
        self.html.push('<');
        self.html.push_str(el.name());
        for (name, value) in el.attrs() {
            self.html.push_str(&format!(" {}=\"{}\"", name, html_escape::encode_double_quoted_attribute(value)));
        }
        self.html.push('>');
        if is_block(el.name()) {
            self.text.push('\n');
        }
    }

    fn close(&mut self, el: &Element) {
        self.html.push_str(&format!("</{}>", el.name()));
        if is_block(el.name()) {
            self.text.push('\n');
        }
    }

    fn push_element(&mut self, el: ElementRef<'_>) {
        self.html.push_str(&el.html());
        let block = is_block(el.value().name());
        if block {
            self.text.push('\n');
        }
        push_block_text(*el, &mut self.text);
        if block {
            self.text.push('\n');
        }
    }

    fn finish(self, resource_path: String) -> SegmentedContent {
        let text = self
            .text
            .lines()
            .map(collapse_whitespace)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        SegmentedContent {
            resource_path,
            text,
            html: self.html.trim().to_string(),
        }
    }
}

fn push_block_text(node: NodeRef<'_, Node>, buf: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => buf.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if is_skipped(name) {
                    continue;
                }
                if name == "br" {
                    buf.push('\n');
                    continue;
                }
                let block = is_block(name);
                if block {
                    buf.push('\n');
                }
                push_block_text(child, buf);
                if block {
                    buf.push('\n');
                }
            }
            _ => {}
        }
    }
}
