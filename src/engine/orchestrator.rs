//! 导入/同步编排器 (Import & Sync Orchestrator)
//!
//! 单飞任务机：idle -> running -> idle，running 期间的新请求静默丢弃，
//! 不排队也不报错，调用方靠订阅进度拿反馈。释放槽位走 Drop 守卫，
//! 任何路径退出都会回到 idle 并广播终态。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::config::AppConfig;
use crate::core::event::{EventSender, JobKind, ScrapeEvent};
use crate::core::model::{
    Category, ChapterBody, ChapterRecord, ChapterRef, Notification, NovelRecord, WorkMetadata,
};
use crate::core::progress::{ProgressHub, ProgressSnapshot};
use crate::core::error::{Result, ScrapeError};
use crate::sites::Site;
use crate::store::Library;
use crate::utils::derive_novel_id;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 章节循环的收尾状态
struct LoopOutcome {
    imported: usize,
    cancelled: bool,
}

/// 单飞槽位守卫：无论任务怎么退出都恢复 idle 并广播终态
struct FlightGuard<'a> {
    orch: &'a Orchestrator,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.orch.running.store(false, Ordering::SeqCst);
        self.orch.progress.finish();
    }
}

pub struct Orchestrator {
    library: Arc<dyn Library>,
    config: Arc<AppConfig>,
    progress: Arc<ProgressHub>,
    events: EventSender,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        library: Arc<dyn Library>,
        config: Arc<AppConfig>,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            library,
            config,
            progress: Arc::new(ProgressHub::new()),
            events,
            cancel,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 订阅进度：订阅瞬间先收到当前状态，之后每次章节尝试都有一条
    pub fn subscribe(&self) -> flume::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    fn try_begin(&self) -> Option<FlightGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        Some(FlightGuard { orch: self })
    }

    /// 新导入：落作品记录，再按发现序跑章节循环
    ///
    /// `staged` 是适配器产出、用户确认过的快照。返回 Ok(false)
    /// 表示已有任务在跑，本次被静默丢弃。
    pub async fn import(
        &self,
        site: &dyn Site,
        source_url: &str,
        staged: WorkMetadata,
    ) -> Result<bool> {
        let Some(_guard) = self.try_begin() else {
            warn!("已有任务在执行，忽略导入请求: {}", source_url);
            return Ok(false);
        };

        let title = staged.title.clone();
        let novel_id = derive_novel_id(source_url, &staged.title);
        let category = staged.category;
        match self.run_import(site, source_url, staged).await {
            Ok(outcome) => {
                self.complete(&title, JobKind::Import, outcome, (&novel_id, category))
                    .await;
                Ok(true)
            }
            Err(e) => {
                self.fail(&title, JobKind::Import, &e, Some((&novel_id, category)))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_import(
        &self,
        site: &dyn Site,
        source_url: &str,
        staged: WorkMetadata,
    ) -> Result<LoopOutcome> {
        let novel_id = derive_novel_id(source_url, &staged.title);
        let total = staged.chapters.len();

        self.events
            .task_started(&novel_id, &staged.title, JobKind::Import);
        self.progress.begin(total, &staged.title);
        self.events.emit(ScrapeEvent::ChaptersDiscovered { total });

        self.library
            .add_novel(NovelRecord {
                id: novel_id.clone(),
                title: staged.title.clone(),
                author: staged.author.clone(),
                cover_url: staged.cover_url.clone(),
                summary: staged.summary.clone(),
                status: staged.status.clone(),
                category: staged.category,
                source_url: source_url.to_string(),
                total_chapters: total,
                last_fetched_at: unix_now(),
            })
            .await?;

        self.run_chapter_loop(site, &novel_id, &staged.chapters, 0, total)
            .await
    }

    /// 增量同步：重取章节列表，按数量截尾取增量
    pub async fn sync(&self, site: &dyn Site, novel_id: &str) -> Result<bool> {
        let Some(_guard) = self.try_begin() else {
            warn!("已有任务在执行，忽略同步请求: {}", novel_id);
            return Ok(false);
        };

        let Some(novel) = self.library.get_novel(novel_id).await? else {
            let e = ScrapeError::Store(format!("书库中不存在作品 {novel_id}"));
            self.fail(novel_id, JobKind::Sync, &e, None).await;
            return Err(e);
        };

        let title = novel.title.clone();
        let category = novel.category;
        match self.run_sync(site, novel).await {
            Ok(outcome) => {
                self.complete(&title, JobKind::Sync, outcome, (novel_id, category))
                    .await;
                Ok(true)
            }
            Err(e) => {
                self.fail(&title, JobKind::Sync, &e, Some((novel_id, category)))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_sync(&self, site: &dyn Site, mut novel: NovelRecord) -> Result<LoopOutcome> {
        let existing = self.library.get_chapters(&novel.id).await?.len();
        let full = site.fetch_chapter_list(&novel.source_url).await?;
        let total = full.len();

        self.events
            .task_started(&novel.id, &novel.title, JobKind::Sync);
        self.progress.begin(total, &novel.title);
        self.events.emit(ScrapeEvent::ChaptersDiscovered { total });

        // 尾部增量按数量截取，不做逐条身份比对
        let delta = &full[existing.min(total)..];
        info!(
            "同步 {}: 远端 {} 章，本地 {} 章，增量 {}",
            novel.title,
            total,
            existing,
            delta.len()
        );

        let outcome = self
            .run_chapter_loop(site, &novel.id, delta, existing, total)
            .await?;

        novel.total_chapters = total;
        novel.last_fetched_at = unix_now();
        self.library.add_novel(novel).await?;

        Ok(outcome)
    }

    /// 批量补全：重抓已入库但正文为空的章节
    pub async fn download(&self, site: &dyn Site, novel_id: &str) -> Result<bool> {
        let Some(_guard) = self.try_begin() else {
            warn!("已有任务在执行，忽略下载请求: {}", novel_id);
            return Ok(false);
        };

        let Some(novel) = self.library.get_novel(novel_id).await? else {
            let e = ScrapeError::Store(format!("书库中不存在作品 {novel_id}"));
            self.fail(novel_id, JobKind::Download, &e, None).await;
            return Err(e);
        };

        let title = novel.title.clone();
        let category = novel.category;
        match self.run_download(site, &novel).await {
            Ok(outcome) => {
                self.complete(&title, JobKind::Download, outcome, (novel_id, category))
                    .await;
                Ok(true)
            }
            Err(e) => {
                self.fail(&title, JobKind::Download, &e, Some((novel_id, category)))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_download(&self, site: &dyn Site, novel: &NovelRecord) -> Result<LoopOutcome> {
        let stored = self.library.get_chapters(&novel.id).await?;
        let targets: Vec<ChapterRecord> = stored
            .into_iter()
            .filter(|c| c.content.is_empty())
            .collect();
        let total = targets.len();

        self.events
            .task_started(&novel.id, &novel.title, JobKind::Download);
        self.progress.begin(total, &novel.title);

        let mut outcome = LoopOutcome {
            imported: 0,
            cancelled: false,
        };

        for (pos, mut record) in targets.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            let current = pos + 1;

            match site.fetch_chapter_content(&record.source_url).await {
                Ok(body) if self.body_passes_gate(&body) => {
                    record.content = body.render();
                    self.library.add_chapter(record.clone()).await?;
                    outcome.imported += 1;
                    self.progress
                        .advance(current, &record.title, format!("✓ {}", record.title));
                    self.events.chapter_progress(current, total, &record.title);
                }
                Ok(_) => {
                    self.chapter_failed(current, &record.title, "正文过短");
                }
                Err(e) => {
                    self.chapter_failed(current, &record.title, &e.to_string());
                }
            }

            if current < total {
                tokio::time::sleep(Duration::from_millis(self.config.scrape.chapter_delay_ms))
                    .await;
            }
        }

        Ok(outcome)
    }

    /// 共享章节循环
    ///
    /// 权威排序：order_index = 既有偏移 + 循环位置。单章失败只进日志，
    /// 循环继续；每次尝试后都推一次进度，绝不攒批。
    async fn run_chapter_loop(
        &self,
        site: &dyn Site,
        novel_id: &str,
        refs: &[ChapterRef],
        offset: usize,
        total: usize,
    ) -> Result<LoopOutcome> {
        let mut outcome = LoopOutcome {
            imported: 0,
            cancelled: false,
        };

        for (pos, chapter) in refs.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("任务在第 {} 章前被取消", offset + pos + 1);
                outcome.cancelled = true;
                break;
            }

            let current = offset + pos + 1;

            if self
                .library
                .is_chapter_exists(novel_id, &chapter.url)
                .await?
            {
                self.events.emit(ScrapeEvent::ChapterSkipped {
                    title: chapter.title.clone(),
                });
                self.progress
                    .advance(current, &chapter.title, format!("↷ {} 已存在", chapter.title));
                continue;
            }

            match site.fetch_chapter_content(&chapter.url).await {
                Ok(body) if self.body_passes_gate(&body) => {
                    self.library
                        .add_chapter(ChapterRecord {
                            id: ChapterRecord::make_id(novel_id, current),
                            novel_id: novel_id.to_string(),
                            title: chapter.title.clone(),
                            content: body.render(),
                            order_index: current,
                            source_url: chapter.url.clone(),
                            is_read: false,
                            date: chapter.date.clone(),
                        })
                        .await?;
                    outcome.imported += 1;
                    self.progress
                        .advance(current, &chapter.title, format!("✓ {}", chapter.title));
                    self.events.chapter_progress(current, total, &chapter.title);
                }
                Ok(_) => {
                    self.chapter_failed(current, &chapter.title, "正文过短");
                }
                Err(e) => {
                    self.chapter_failed(current, &chapter.title, &e.to_string());
                }
            }

            if pos + 1 < refs.len() {
                tokio::time::sleep(Duration::from_millis(self.config.scrape.chapter_delay_ms))
                    .await;
            }
        }

        Ok(outcome)
    }

    /// 图片章节与文本章节的最短正文闸门
    fn body_passes_gate(&self, body: &ChapterBody) -> bool {
        let min = match body {
            ChapterBody::Images(_) => self.config.scrape.min_image_len,
            ChapterBody::Text(_) => self.config.scrape.min_text_len,
        };
        body.len() >= min
    }

    fn chapter_failed(&self, current: usize, title: &str, error: &str) {
        warn!("章节抓取失败 {title}: {error}");
        self.events.emit(ScrapeEvent::ChapterFailed {
            title: title.to_string(),
            error: error.to_string(),
        });
        self.progress
            .advance(current, title, format!("✗ {title}: {error}"));
    }

    async fn complete(
        &self,
        title: &str,
        kind: JobKind,
        outcome: LoopOutcome,
        payload: (&str, Category),
    ) {
        if outcome.cancelled {
            let message = format!("{kind} 任务被取消: {title}");
            self.events.emit(ScrapeEvent::TaskFailed {
                error: message.clone(),
            });
            let _ = self
                .library
                .add_notification(
                    Notification::scrape("任务取消", message).with_payload(payload.0, payload.1),
                )
                .await;
            return;
        }

        info!("{kind} 完成: {title}，共 {} 章", outcome.imported);
        self.events.emit(ScrapeEvent::TaskCompleted {
            title: title.to_string(),
            imported: outcome.imported,
        });
        let _ = self
            .library
            .add_notification(
                Notification::scrape(
                    format!("{kind} 完成: {title}"),
                    format!("共导入 {} 章", outcome.imported),
                )
                .with_payload(payload.0, payload.1),
            )
            .await;
    }

    /// 失败通知：作品记录不存在时没有可携带的 payload
    async fn fail(
        &self,
        title: &str,
        kind: JobKind,
        error: &ScrapeError,
        payload: Option<(&str, Category)>,
    ) {
        let hint = error.user_hint();
        warn!("{kind} 失败: {title}: {hint}");
        self.events.emit(ScrapeEvent::TaskFailed {
            error: hint.clone(),
        });
        let mut note = Notification::scrape(format!("{kind} 失败: {title}"), hint);
        if let Some((novel_id, category)) = payload {
            note = note.with_payload(novel_id, category);
        }
        let _ = self.library.add_notification(note).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::core::event::create_event_channel;
    use crate::sites::SiteKind;
    use crate::store::MemoryLibrary;

    struct FakeSite {
        chapters: Vec<ChapterRef>,
        content_fetches: AtomicUsize,
    }

    impl FakeSite {
        fn with_chapters(n: usize) -> Self {
            let chapters = (1..=n)
                .map(|i| {
                    ChapterRef::new(
                        format!("Chapter {i}"),
                        format!("https://example.com/n/ch-{i}"),
                    )
                })
                .collect();
            Self {
                chapters,
                content_fetches: AtomicUsize::new(0),
            }
        }

        fn fetches(&self) -> usize {
            self.content_fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Site for FakeSite {
        fn kind(&self) -> SiteKind {
            SiteKind::Generic
        }

        async fn fetch_details(&self, url: &str) -> Result<WorkMetadata> {
            Ok(staged_meta(url, self.chapters.clone()))
        }

        async fn fetch_chapter_list(&self, _url: &str) -> Result<Vec<ChapterRef>> {
            Ok(self.chapters.clone())
        }

        async fn fetch_chapter_content(&self, _url: &str) -> Result<ChapterBody> {
            self.content_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(ChapterBody::Text("正".repeat(400)))
        }
    }

    fn staged_meta(url: &str, chapters: Vec<ChapterRef>) -> WorkMetadata {
        WorkMetadata {
            title: "测试作品".to_string(),
            author: None,
            cover_url: None,
            summary: None,
            status: None,
            category: Category::Novel,
            chapters,
            publishers: Vec::new(),
            selected_publisher: None,
            source_url: url.to_string(),
            source_id: "test".to_string(),
        }
    }

    fn test_orchestrator(library: Arc<MemoryLibrary>) -> Orchestrator {
        let mut config = AppConfig::default();
        config.scrape.chapter_delay_ms = 0;
        let (events, _rx) = create_event_channel();
        Orchestrator::new(library, Arc::new(config), events, CancellationToken::new())
    }

    const SOURCE: &str = "https://example.com/novel/test-novel";

    #[tokio::test]
    async fn import_is_idempotent() {
        let library = Arc::new(MemoryLibrary::new());
        let orch = test_orchestrator(library.clone());
        let site = FakeSite::with_chapters(5);

        let staged = site.fetch_details(SOURCE).await.unwrap();
        assert!(orch.import(&site, SOURCE, staged.clone()).await.unwrap());
        assert_eq!(site.fetches(), 5);

        // 第二次导入：全部命中去重，不再发起任何正文请求
        assert!(orch.import(&site, SOURCE, staged).await.unwrap());
        assert_eq!(site.fetches(), 5);

        let novel_id = derive_novel_id(SOURCE, "测试作品");
        assert_eq!(library.get_chapters(&novel_id).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn order_index_follows_discovery_order() {
        let library = Arc::new(MemoryLibrary::new());
        let orch = test_orchestrator(library.clone());
        let site = FakeSite::with_chapters(3);

        let staged = site.fetch_details(SOURCE).await.unwrap();
        orch.import(&site, SOURCE, staged).await.unwrap();

        let novel_id = derive_novel_id(SOURCE, "测试作品");
        let stored = library.get_chapters(&novel_id).await.unwrap();
        let order: Vec<usize> = stored.iter().map(|c| c.order_index).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(stored[0].id, format!("{novel_id}-ch-1"));
    }

    #[tokio::test]
    async fn sync_processes_exactly_the_tail_delta() {
        let library = Arc::new(MemoryLibrary::new());
        let orch = test_orchestrator(library.clone());

        let site = FakeSite::with_chapters(10);
        let staged = site.fetch_details(SOURCE).await.unwrap();
        orch.import(&site, SOURCE, staged).await.unwrap();
        assert_eq!(site.fetches(), 10);

        let novel_id = derive_novel_id(SOURCE, "测试作品");
        let grown = FakeSite::with_chapters(15);
        assert!(orch.sync(&grown, &novel_id).await.unwrap());

        // 只抓 11-15 五章
        assert_eq!(grown.fetches(), 5);
        let stored = library.get_chapters(&novel_id).await.unwrap();
        assert_eq!(stored.len(), 15);
        assert_eq!(stored[10].order_index, 11);
        assert_eq!(
            stored[14].source_url,
            "https://example.com/n/ch-15"
        );

        let novel = library.get_novel(&novel_id).await.unwrap().unwrap();
        assert_eq!(novel.total_chapters, 15);
        assert!(novel.last_fetched_at > 0);
    }

    #[tokio::test]
    async fn second_job_while_running_is_a_silent_noop() {
        let library = Arc::new(MemoryLibrary::new());
        let orch = test_orchestrator(library.clone());
        let site = FakeSite::with_chapters(3);

        let _slot = orch.try_begin().unwrap();
        let staged = site.fetch_details(SOURCE).await.unwrap();
        let started = orch.import(&site, SOURCE, staged).await.unwrap();

        assert!(!started);
        assert_eq!(site.fetches(), 0);
        assert!(orch.is_running());
    }

    #[tokio::test]
    async fn flight_slot_is_released_after_completion() {
        let library = Arc::new(MemoryLibrary::new());
        let orch = test_orchestrator(library.clone());
        let site = FakeSite::with_chapters(1);

        let staged = site.fetch_details(SOURCE).await.unwrap();
        orch.import(&site, SOURCE, staged.clone()).await.unwrap();
        assert!(!orch.is_running());

        // 槽位释放后可以再次开任务
        assert!(orch.import(&site, SOURCE, staged).await.unwrap());
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_between_chapters() {
        let library = Arc::new(MemoryLibrary::new());
        let mut config = AppConfig::default();
        config.scrape.chapter_delay_ms = 0;
        let (events, _rx) = create_event_channel();
        let cancel = CancellationToken::new();
        let orch = Orchestrator::new(library.clone(), Arc::new(config), events, cancel.clone());

        cancel.cancel();
        let site = FakeSite::with_chapters(5);
        let staged = site.fetch_details(SOURCE).await.unwrap();
        assert!(orch.import(&site, SOURCE, staged).await.unwrap());

        assert_eq!(site.fetches(), 0);
        let notes = library.notifications();
        assert_eq!(notes[0].title, "任务取消");
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn completion_notification_lands_in_the_store() {
        let library = Arc::new(MemoryLibrary::new());
        let orch = test_orchestrator(library.clone());
        let site = FakeSite::with_chapters(2);

        let staged = site.fetch_details(SOURCE).await.unwrap();
        orch.import(&site, SOURCE, staged).await.unwrap();

        let notes = library.notifications();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].title.contains("import"));
        assert_eq!(notes[0].kind, "scrape");
        // payload 携带作品 ID 与类别，供消费端跳转
        assert_eq!(
            notes[0].novel_id.as_deref(),
            Some(derive_novel_id(SOURCE, "测试作品").as_str())
        );
        assert_eq!(notes[0].category, Some(Category::Novel));
    }
}
