//! 进度状态单元 (Progress State Cell)
//!
//! 单写者状态 + 每订阅者独立通道，保证进度通知按产生顺序送达、
//! 订阅时立即收到当前快照。日志环形裁剪至最近 50 条，最新在前。

use parking_lot::Mutex;
use serde::Serialize;

/// 进度日志上限
const LOG_CAP: usize = 50;

/// 采集任务进度
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScraperProgress {
    pub current: usize,
    pub total: usize,
    pub current_title: String,
    /// 最近日志，最新在前
    pub logs: Vec<String>,
}

impl ScraperProgress {
    fn push_log(&mut self, line: String) {
        self.logs.insert(0, line);
        self.logs.truncate(LOG_CAP);
    }
}

/// 面向订阅者的状态快照
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub progress: ScraperProgress,
    pub is_running: bool,
}

struct HubState {
    snapshot: ProgressSnapshot,
    subscribers: Vec<flume::Sender<ProgressSnapshot>>,
}

/// 进度广播枢纽
///
/// 每个编排器实例持有一个；每次章节尝试后变更并广播，从不批量合并。
pub struct ProgressHub {
    state: Mutex<HubState>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState {
                snapshot: ProgressSnapshot::default(),
                subscribers: Vec::new(),
            }),
        }
    }

    /// 订阅进度：返回的通道先收到当前快照，之后按变更顺序逐条收到新状态。
    /// 丢弃接收端即自动退订。
    pub fn subscribe(&self) -> flume::Receiver<ProgressSnapshot> {
        let (tx, rx) = flume::unbounded();
        let mut state = self.state.lock();
        let _ = tx.send(state.snapshot.clone());
        state.subscribers.push(tx);
        rx
    }

    /// 当前快照
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().snapshot.clone()
    }

    /// 任务开始：重置进度并置运行标志
    pub fn begin(&self, total: usize, title: &str) {
        self.mutate(|snap| {
            snap.progress = ScraperProgress {
                current: 0,
                total,
                current_title: title.to_string(),
                logs: Vec::new(),
            };
            snap.is_running = true;
        });
    }

    /// 单次章节尝试后的推进
    pub fn advance(&self, current: usize, title: &str, log_line: String) {
        self.mutate(|snap| {
            snap.progress.current = current;
            snap.progress.current_title = title.to_string();
            snap.progress.push_log(log_line);
        });
    }

    /// 追加一条日志
    pub fn log(&self, line: String) {
        self.mutate(|snap| snap.progress.push_log(line));
    }

    /// 任务结束：清运行标志（进度保留供调用方查看，直至下次任务或显式清除）
    pub fn finish(&self) {
        self.mutate(|snap| snap.is_running = false);
    }

    /// 显式清除进度
    pub fn reset(&self) {
        self.mutate(|snap| {
            snap.progress = ScraperProgress::default();
            snap.is_running = false;
        });
    }

    fn mutate(&self, f: impl FnOnce(&mut ProgressSnapshot)) {
        let mut state = self.state.lock();
        f(&mut state.snapshot);
        let snapshot = state.snapshot.clone();
        // 已断开的订阅者顺带清除
        state
            .subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}
