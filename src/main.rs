#![allow(dead_code)]

//! 应用程序入口 (Application Entrypoint)
//!
//! 负责 CLI 指令解析、遥测层初始化、依赖注入及系统生命周期管理。

mod core;
mod engine;
mod extract;
mod network;
mod sites;
mod store;
mod ui;
mod utils;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

use crate::core::config::AppConfig;
use crate::core::error::ScrapeError;
use crate::core::event::create_event_channel;
use crate::engine::Orchestrator;
use crate::network::service::HttpService;
use crate::network::session::Session;
use crate::sites::{SiteContext, site_for};
use crate::store::{FsLibrary, Library};
use crate::ui::{Ui, get_multi};

/// 进度条感知的日志写入器 (TUI-aware Log Writer)
///
/// 确保非同步日志输出不会破坏终端进度条的渲染布局。
struct IndicatifWriter;

impl io::Write for IndicatifWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let _ = get_multi().println(s.trim_end());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for IndicatifWriter {
    type Writer = IndicatifWriter;

    fn make_writer(&self) -> Self::Writer {
        IndicatifWriter
    }
}

/// 命令行界面脚手架 (CLI Scaffolding)
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 从源站 URL 导入新作品
    Import {
        /// 作品详情页或目录页 URL
        url: String,
        /// 只导入指定发布方 (扫描组) 的章节
        #[arg(short, long)]
        publisher: Option<String>,
    },
    /// 增量同步已入库作品的新章节
    Sync {
        /// 书库中的作品 ID
        id: String,
    },
    /// 补抓已入库作品中缺失正文的章节
    Download {
        /// 书库中的作品 ID
        id: String,
    },
    /// 站内搜索（仅 API 型源支持）
    Search {
        /// 源站域名 (如 mangadex.org)
        #[arg(short, long)]
        site: String,
        /// 搜索关键词
        query: String,
    },
    /// 列出书库中的全部作品
    List,
}

/// 解析书库根目录：配置优先，否则退回平台数据目录
fn resolve_library_path(config: &AppConfig) -> PathBuf {
    if let Some(ref path) = config.library_path {
        return PathBuf::from(path);
    }
    directories::ProjectDirs::from("", "", "bookspider")
        .map(|dirs| dirs.data_dir().join("library"))
        .unwrap_or_else(|| PathBuf::from("./library"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 遥测层初始化 (Telemetry Layer Initialization)
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(IndicatifWriter)
        .with_target(false)
        .with_ansi(true)
        .init();

    // 依赖项初始化与注入 (Dependency Injection)
    let config = Arc::new(AppConfig::load()?);
    let cli = Cli::parse();

    let session = Arc::new(Session::new());
    session.set_ua(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
            .into(),
    );
    let http = Arc::new(HttpService::new(config.clone(), session.clone())?);
    let ctx = SiteContext::new(config.clone(), http.clone());

    let library: Arc<dyn Library> = FsLibrary::open(resolve_library_path(&config)).await?;

    match cli.command {
        Commands::Import { url, publisher } => {
            run_task(config, ctx, library, |orch, ctx| async move {
                let site = site_for(&url, ctx);
                let mut staged = site.fetch_details(&url).await?;
                if let Some(publisher) = publisher {
                    staged.chapters = site
                        .fetch_chapter_list_for_publisher(&url, &publisher)
                        .await?;
                    staged.selected_publisher = Some(publisher);
                }
                orch.import(site.as_ref(), &url, staged).await?;
                Ok(())
            })
            .await?;
        }
        Commands::Sync { id } => {
            let record = require_novel(library.as_ref(), &id).await?;
            run_task(config, ctx, library, |orch, ctx| async move {
                let site = site_for(&record.source_url, ctx);
                orch.sync(site.as_ref(), &record.id).await?;
                Ok(())
            })
            .await?;
        }
        Commands::Download { id } => {
            let record = require_novel(library.as_ref(), &id).await?;
            run_task(config, ctx, library, |orch, ctx| async move {
                let site = site_for(&record.source_url, ctx);
                orch.download(site.as_ref(), &record.id).await?;
                Ok(())
            })
            .await?;
        }
        Commands::Search { site, query } => {
            let adapter = site_for(&format!("https://{}/", site), ctx);
            let results = adapter.search(&query).await?;
            if results.is_empty() {
                println!("「{}」无匹配结果", query);
            }
            for work in results {
                println!(
                    "{}  [{}]  {}",
                    work.title,
                    work.status.as_deref().unwrap_or("?"),
                    work.source_url
                );
            }
        }
        Commands::List => {
            let novels = library.list_novels().await?;
            if novels.is_empty() {
                println!("书库为空");
            }
            for novel in novels {
                println!(
                    "{}  {}  ({} 章)  {}",
                    novel.id, novel.title, novel.total_chapters, novel.source_url
                );
            }
        }
    }

    Ok(())
}

/// 按 ID 取作品记录，不存在即报错
async fn require_novel(
    library: &dyn Library,
    id: &str,
) -> anyhow::Result<crate::core::model::NovelRecord> {
    library
        .get_novel(id)
        .await?
        .ok_or_else(|| ScrapeError::Custom(format!("书库中不存在作品: {}", id)).into())
}

/// 搭建事件链路与信号处理，在编排器上执行单个任务
async fn run_task<F, Fut>(
    config: Arc<AppConfig>,
    ctx: SiteContext,
    library: Arc<dyn Library>,
    task: F,
) -> anyhow::Result<()>
where
    F: FnOnce(Arc<Orchestrator>, SiteContext) -> Fut,
    Fut: Future<Output = crate::core::error::Result<()>>,
{
    // 建立 UI 事件反馈链路 (Event feedback loop)
    let (event_sender, event_receiver) = create_event_channel();
    let ui_handle = Ui::run(event_receiver);

    let cancel = CancellationToken::new();
    let orch = Arc::new(Orchestrator::new(
        library,
        config,
        event_sender,
        cancel.clone(),
    ));

    // 信号处理与优雅退出 (Signal Handling)
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let result = task(orch, ctx).await;

    // 任务结束后发送端随编排器析构，等待 UI 渲染收尾
    let _ = ui_handle.await;

    result?;
    Ok(())
}
