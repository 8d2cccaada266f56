use clap::{Parser, Subcommand};
use deep_reader_chapters::chapter::get_chapter_by_number;
use deep_reader_chapters::import_queue::ImportQueue;
use deep_reader_chapters::{
    breadcrumb, build_uploader, chapter_tree, ingest_file, navigation, open_database, Config, IngestError,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "deep-reader-chapters")]
#[command(about = "EPUB 章节导入与目录层级查询")]
#[command(version)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "deep-reader.toml")]
    config: PathBuf,

    /// 覆盖配置中的数据库路径
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 导入一个或多个 EPUB 文件
    Ingest {
        files: Vec<PathBuf>,
        /// 书名（只导入一个文件时有效）
        #[arg(long)]
        title: Option<String>,
    },
    /// 输出一本书的目录树
    Tree { book_id: i64 },
    /// 输出某一章的上一章/下一章/父章节
    Nav { book_id: i64, number: i32 },
    /// 输出某一章的面包屑
    Breadcrumb { chapter_id: i64 },
    /// 输出某一章的完整内容
    Show { book_id: i64, number: i32 },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), IngestError> {
    let mut config = Config::load(&cli.config)?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    match cli.command {
        Commands::Ingest { files, title } => ingest(&config, files, title),
        Commands::Tree { book_id } => {
            let conn = open_database(&config)?;
            print_json(&chapter_tree(&conn, book_id)?)
        }
        Commands::Nav { book_id, number } => {
            let conn = open_database(&config)?;
            print_json(&navigation(&conn, book_id, number)?)
        }
        Commands::Breadcrumb { chapter_id } => {
            let conn = open_database(&config)?;
            print_json(&breadcrumb(&conn, chapter_id)?)
        }
        Commands::Show { book_id, number } => {
            let conn = open_database(&config)?;
            let chapter = get_chapter_by_number(&conn, book_id, number)?
                .ok_or_else(|| IngestError::ChapterNotFound(format!("book {} #{}", book_id, number)))?;
            print_json(&chapter)
        }
    }
}

/// 每个工作线程各自打开数据库连接，同一本书只在一个线程里处理
fn ingest(config: &Config, files: Vec<PathBuf>, title: Option<String>) -> Result<(), IngestError> {
    if files.is_empty() {
        return Err(IngestError::Config("没有指定要导入的文件".to_string()));
    }
    let title = if files.len() == 1 { title } else { None };

    // 建表只做一次，避免多个线程同时建表
    open_database(config)?;

    let queue = ImportQueue::new(config.ingest.max_concurrent);
    for file in files {
        queue.enqueue(file, title.clone())?;
    }

    let uploader = build_uploader(config);
    let results = queue.drain(|task| {
        let conn = open_database(config)?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        ingest_file(&conn, &task.file_path, task.title.as_deref(), uploader.as_ref(), &config.ingest)
    });

    let mut failed = 0;
    let mut reports = Vec::new();
    for (task, result) in results {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                failed += 1;
                error!("{}: {}", task.file_path.display(), e);
            }
        }
    }
    info!("导入结束: 成功 {} 本, 失败 {} 本", reports.len(), failed);
    print_json(&reports)?;

    if failed > 0 {
        return Err(IngestError::Queue(format!("{} 个文件导入失败", failed)));
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), IngestError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| IngestError::Io(e.into()))?;
    println!("{}", json);
    Ok(())
}
