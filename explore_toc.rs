/// 查看 EPUB 的目录层级和分段结果
///
/// 用法: explore_toc <file.epub>

use deep_reader_chapters::archive::BookArchive;
use deep_reader_chapters::config::IngestOptions;
use deep_reader_chapters::parser::{count_words, hierarchy_entries, ContentSegmenter};
use std::path::Path;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let Some(arg) = std::env::args().nth(1) else {
        eprintln!("用法: explore_toc <file.epub>");
        std::process::exit(2);
    };
    let epub_path = Path::new(&arg);

    let archive = match BookArchive::open(epub_path) {
        Ok(archive) => archive,
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    };
    println!("✓ EPUB 文件打开成功: {}\n", epub_path.display());

    println!("=== Spine (阅读顺序) ===");
    println!("Spine 长度: {}", archive.spine().len());
    for (i, path) in archive.spine().iter().enumerate().take(10) {
        println!("  [{}] {}", i, path);
    }
    println!();

    let (entries, source) = hierarchy_entries(&archive);
    println!("=== 目录条目 ({:?}, {} 个) ===", source, entries.len());

    let options = IngestOptions::default();
    let mut segmenter = ContentSegmenter::new(&archive, &entries, &options.resource_prefixes);
    for (i, entry) in entries.iter().enumerate() {
        let indent = "  ".repeat(entry.level.saturating_sub(1) as usize);
        match segmenter.segment(entry) {
            Ok(content) => println!(
                "{}[{}] {} -> {} ({} 字)",
                indent,
                i + 1,
                entry.title,
                entry.reference,
                count_words(&content.text)
            ),
            Err(e) => println!("{}[{}] {} -> {} ✗ {}", indent, i + 1, entry.title, entry.reference, e),
        }
    }

    if let Some(cover) = archive.cover() {
        println!("\n封面: {} ({})", cover.path, cover.mime);
    }
}
