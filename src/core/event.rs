//! 事件系统定义
//!
//! 用于引擎与 UI 之间的完全解耦通信。

use flume::{Receiver, Sender};

/// 采集事件类型
#[derive(Debug, Clone)]
pub enum ScrapeEvent {
    /// 任务开始
    TaskStarted {
        novel_id: String,
        title: String,
        kind: JobKind,
    },

    /// 发现章节总数
    ChaptersDiscovered { total: usize },

    /// 章节处理进度（成功、跳过、失败均计入）
    ChapterProgress {
        current: usize,
        total: usize,
        title: String,
    },

    /// 章节因已存在被跳过
    ChapterSkipped { title: String },

    /// 章节处理失败（不中断任务）
    ChapterFailed { title: String, error: String },

    /// 任务完成
    TaskCompleted { title: String, imported: usize },

    /// 任务失败
    TaskFailed { error: String },

    /// 日志消息（用于 UI 显示）
    Log { level: LogLevel, message: String },
}

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Import,
    Sync,
    Download,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Import => write!(f, "import"),
            JobKind::Sync => write!(f, "sync"),
            JobKind::Download => write!(f, "download"),
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// 事件发送器
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<ScrapeEvent>,
}

impl EventSender {
    pub fn new(tx: Sender<ScrapeEvent>) -> Self {
        Self { tx }
    }

    /// 发送事件
    pub fn emit(&self, event: ScrapeEvent) {
        let _ = self.tx.send(event);
    }

    /// 发送任务开始事件
    pub fn task_started(&self, novel_id: &str, title: &str, kind: JobKind) {
        self.emit(ScrapeEvent::TaskStarted {
            novel_id: novel_id.to_string(),
            title: title.to_string(),
            kind,
        });
    }

    /// 发送章节进度事件
    pub fn chapter_progress(&self, current: usize, total: usize, title: &str) {
        self.emit(ScrapeEvent::ChapterProgress {
            current,
            total,
            title: title.to_string(),
        });
    }

    /// 发送日志事件
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(ScrapeEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }
}

/// 事件接收器
pub struct EventReceiver {
    rx: Receiver<ScrapeEvent>,
}

impl EventReceiver {
    pub fn new(rx: Receiver<ScrapeEvent>) -> Self {
        Self { rx }
    }

    /// 异步接收事件
    pub async fn recv_async(&self) -> Option<ScrapeEvent> {
        self.rx.recv_async().await.ok()
    }

    /// 非阻塞接收事件
    pub fn try_recv(&self) -> Option<ScrapeEvent> {
        self.rx.try_recv().ok()
    }
}

/// 创建事件通道
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = flume::unbounded();
    (EventSender::new(tx), EventReceiver::new(rx))
}
