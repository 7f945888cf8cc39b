//! 终端进度渲染引擎 (Terminal UI Progress Engine)
//!
//! 基于 `indicatif` 实现非阻塞式进度条编排，消费引擎事件流并实时渲染任务状态。

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::core::event::{EventReceiver, LogLevel, ScrapeEvent};

/// 全局 TUI 容器 (Singleton)
static MULTI: OnceLock<MultiProgress> = OnceLock::new();

/// 获取全局进度容器实例
pub fn get_multi() -> &'static MultiProgress {
    MULTI.get_or_init(MultiProgress::new)
}

/// TUI 状态容器
pub struct UiState {
    /// 全局任务主状态条
    main_bar: Option<ProgressBar>,
    /// 章节采集进度条
    chapter_bar: Option<ProgressBar>,
}

impl UiState {
    fn new() -> Self {
        Self {
            main_bar: None,
            chapter_bar: None,
        }
    }
}

static STATE: OnceLock<Arc<RwLock<UiState>>> = OnceLock::new();

fn get_state() -> &'static Arc<RwLock<UiState>> {
    STATE.get_or_init(|| Arc::new(RwLock::new(UiState::new())))
}

/// 进度协调器 (Progress Orchestrator)
pub struct Ui;

impl Ui {
    /// 激活事件监听循环，启动异步渲染管线
    pub fn run(receiver: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = receiver.recv_async().await {
                Self::handle_event(event);
            }
        })
    }

    /// 执行 UI 状态转换与渲染更新
    fn handle_event(event: ScrapeEvent) {
        let multi = get_multi();
        let state = get_state();
        let mut ui = state.write();

        match event {
            ScrapeEvent::TaskStarted { title, kind, .. } => {
                let style = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] {msg}")
                    .unwrap()
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(style);
                bar.set_message(format!("📚 [{}] {}", kind, title));
                bar.enable_steady_tick(Duration::from_millis(100));
                ui.main_bar = Some(bar);
            }
            ScrapeEvent::ChaptersDiscovered { total } => {
                let style = ProgressStyle::default_bar()
                    .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                    .unwrap()
                    .progress_chars("█▉▊▋▌▍▎▏  ");

                let bar = multi.add(ProgressBar::new(total as u64));
                bar.set_style(style);
                ui.chapter_bar = Some(bar);
            }
            ScrapeEvent::ChapterProgress { current, title, .. } => {
                if let Some(ref bar) = ui.chapter_bar {
                    bar.set_position(current as u64);
                    bar.set_message(truncate_string(&title, 30));
                }
            }
            ScrapeEvent::ChapterSkipped { title } => {
                if let Some(ref bar) = ui.chapter_bar {
                    bar.set_message(format!("↷ {}", truncate_string(&title, 28)));
                }
            }
            ScrapeEvent::ChapterFailed { title, error } => {
                let _ = multi.println(format!("✗ {}: {}", truncate_string(&title, 28), error));
            }
            ScrapeEvent::TaskCompleted { title, imported } => {
                if let Some(ref bar) = ui.chapter_bar {
                    bar.finish_with_message(format!("✅ {} 章已入库", imported));
                }
                if let Some(ref bar) = ui.main_bar {
                    bar.finish_with_message(format!("✅ DONE: {}", title));
                }
            }
            ScrapeEvent::TaskFailed { error } => {
                if let Some(ref bar) = ui.chapter_bar {
                    bar.abandon();
                }
                if let Some(ref bar) = ui.main_bar {
                    bar.abandon_with_message(format!("❌ FAILED: {}", error));
                }
            }
            ScrapeEvent::Log { level, message } => {
                let prefix = match level {
                    LogLevel::Debug => "·",
                    LogLevel::Info => "ℹ",
                    LogLevel::Warn => "⚠",
                    LogLevel::Error => "‼",
                };
                let _ = multi.println(format!("{} {}", prefix, message));
            }
        }
    }
}

/// 执行语义化字符串截断
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}
