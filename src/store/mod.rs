//! 本地书库 (Library Store)
//!
//! 键寻址的持久化边界：作品记录、章节记录与通知。
//! 核心流水线只认 `Library` trait，不管底下是磁盘还是内存。

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::error::{Result, ScrapeError};
use crate::core::model::{ChapterRecord, Notification, NovelRecord};

/// 持久化边界
///
/// 批量写章节时保留既有的已读状态（先读后写合并）。
/// 模式迁移不在此层职责内。
#[async_trait]
pub trait Library: Send + Sync {
    async fn add_novel(&self, novel: NovelRecord) -> Result<()>;
    async fn get_novel(&self, id: &str) -> Result<Option<NovelRecord>>;
    async fn list_novels(&self) -> Result<Vec<NovelRecord>>;

    async fn add_chapter(&self, chapter: ChapterRecord) -> Result<()>;
    async fn add_chapters(&self, chapters: Vec<ChapterRecord>) -> Result<()>;
    async fn is_chapter_exists(&self, novel_id: &str, source_url: &str) -> Result<bool>;
    /// 按 order_index 升序返回
    async fn get_chapters(&self, novel_id: &str) -> Result<Vec<ChapterRecord>>;

    async fn add_notification(&self, notification: Notification) -> Result<()>;
}

fn merge_read_flags(existing: &[ChapterRecord], incoming: &mut [ChapterRecord]) {
    let read_ids: HashSet<&str> = existing
        .iter()
        .filter(|c| c.is_read)
        .map(|c| c.id.as_str())
        .collect();
    for ch in incoming.iter_mut() {
        if read_ids.contains(ch.id.as_str()) {
            ch.is_read = true;
        }
    }
}

fn upsert_sorted(records: &mut Vec<ChapterRecord>, incoming: Vec<ChapterRecord>) {
    for ch in incoming {
        match records.iter_mut().find(|c| c.id == ch.id) {
            Some(slot) => *slot = ch,
            None => records.push(ch),
        }
    }
    records.sort_by_key(|c| c.order_index);
}

/// 落盘实现：平台数据目录下的 JSON 记录
///
/// 章节按作品聚合成单个文件；内存里的 source_url 索引让
/// 导入循环的去重探测不必每章读盘。
pub struct FsLibrary {
    root: PathBuf,
    /// novel_id -> 已存章节的 source_url 集合
    chapter_index: RwLock<HashMap<String, HashSet<String>>>,
}

impl FsLibrary {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("novels")).await?;
        tokio::fs::create_dir_all(root.join("chapters")).await?;

        let lib = Arc::new(Self {
            root,
            chapter_index: RwLock::new(HashMap::new()),
        });
        lib.rebuild_index().await?;
        Ok(lib)
    }

    async fn rebuild_index(&self) -> Result<()> {
        let mut index: HashMap<String, HashSet<String>> = HashMap::new();
        let mut entries = tokio::fs::read_dir(self.root.join("chapters")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let Some(novel_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let chapters: Vec<ChapterRecord> = read_json(&path).await?.unwrap_or_default();
            index.insert(
                novel_id.to_string(),
                chapters.into_iter().map(|c| c.source_url).collect(),
            );
        }
        debug!("书库索引已重建，共 {} 部作品", index.len());
        *self.chapter_index.write() = index;
        Ok(())
    }

    fn novel_path(&self, id: &str) -> PathBuf {
        self.root.join("novels").join(format!("{id}.json"))
    }

    fn chapters_path(&self, novel_id: &str) -> PathBuf {
        self.root.join("chapters").join(format!("{novel_id}.json"))
    }

    fn notifications_path(&self) -> PathBuf {
        self.root.join("notifications.json")
    }

    async fn write_chapters(&self, novel_id: &str, incoming: Vec<ChapterRecord>) -> Result<()> {
        let path = self.chapters_path(novel_id);
        let mut records: Vec<ChapterRecord> = read_json(&path).await?.unwrap_or_default();

        let mut incoming = incoming;
        merge_read_flags(&records, &mut incoming);

        {
            let mut index = self.chapter_index.write();
            let urls = index.entry(novel_id.to_string()).or_default();
            for ch in &incoming {
                urls.insert(ch.source_url.clone());
            }
        }

        upsert_sorted(&mut records, incoming);
        write_json(&path, &records).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[async_trait]
impl Library for FsLibrary {
    async fn add_novel(&self, novel: NovelRecord) -> Result<()> {
        write_json(&self.novel_path(&novel.id), &novel).await
    }

    async fn get_novel(&self, id: &str) -> Result<Option<NovelRecord>> {
        read_json(&self.novel_path(id)).await
    }

    async fn list_novels(&self) -> Result<Vec<NovelRecord>> {
        let mut novels = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join("novels")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            if let Some(novel) = read_json::<NovelRecord>(&path).await? {
                novels.push(novel);
            }
        }
        novels.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(novels)
    }

    async fn add_chapter(&self, chapter: ChapterRecord) -> Result<()> {
        let novel_id = chapter.novel_id.clone();
        self.write_chapters(&novel_id, vec![chapter]).await
    }

    async fn add_chapters(&self, chapters: Vec<ChapterRecord>) -> Result<()> {
        let Some(novel_id) = chapters.first().map(|c| c.novel_id.clone()) else {
            return Ok(());
        };
        if chapters.iter().any(|c| c.novel_id != novel_id) {
            return Err(ScrapeError::Store(
                "批量写入的章节必须属于同一部作品".to_string(),
            ));
        }
        self.write_chapters(&novel_id, chapters).await
    }

    async fn is_chapter_exists(&self, novel_id: &str, source_url: &str) -> Result<bool> {
        Ok(self
            .chapter_index
            .read()
            .get(novel_id)
            .is_some_and(|urls| urls.contains(source_url)))
    }

    async fn get_chapters(&self, novel_id: &str) -> Result<Vec<ChapterRecord>> {
        Ok(read_json(&self.chapters_path(novel_id))
            .await?
            .unwrap_or_default())
    }

    async fn add_notification(&self, notification: Notification) -> Result<()> {
        let path = self.notifications_path();
        let mut all: Vec<Notification> = read_json(&path).await?.unwrap_or_default();
        all.insert(0, notification);
        write_json(&path, &all).await
    }
}

/// 内存实现：测试与空跑
#[derive(Default)]
pub struct MemoryLibrary {
    novels: RwLock<HashMap<String, NovelRecord>>,
    chapters: RwLock<HashMap<String, Vec<ChapterRecord>>>,
    notifications: RwLock<Vec<Notification>>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().clone()
    }
}

#[async_trait]
impl Library for MemoryLibrary {
    async fn add_novel(&self, novel: NovelRecord) -> Result<()> {
        self.novels.write().insert(novel.id.clone(), novel);
        Ok(())
    }

    async fn get_novel(&self, id: &str) -> Result<Option<NovelRecord>> {
        Ok(self.novels.read().get(id).cloned())
    }

    async fn list_novels(&self) -> Result<Vec<NovelRecord>> {
        let mut novels: Vec<NovelRecord> = self.novels.read().values().cloned().collect();
        novels.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(novels)
    }

    async fn add_chapter(&self, chapter: ChapterRecord) -> Result<()> {
        let mut store = self.chapters.write();
        let records = store.entry(chapter.novel_id.clone()).or_default();
        let mut incoming = vec![chapter];
        merge_read_flags(records, &mut incoming);
        upsert_sorted(records, incoming);
        Ok(())
    }

    async fn add_chapters(&self, chapters: Vec<ChapterRecord>) -> Result<()> {
        let Some(novel_id) = chapters.first().map(|c| c.novel_id.clone()) else {
            return Ok(());
        };
        let mut store = self.chapters.write();
        let records = store.entry(novel_id).or_default();
        let mut incoming = chapters;
        merge_read_flags(records, &mut incoming);
        upsert_sorted(records, incoming);
        Ok(())
    }

    async fn is_chapter_exists(&self, novel_id: &str, source_url: &str) -> Result<bool> {
        Ok(self
            .chapters
            .read()
            .get(novel_id)
            .is_some_and(|records| records.iter().any(|c| c.source_url == source_url)))
    }

    async fn get_chapters(&self, novel_id: &str) -> Result<Vec<ChapterRecord>> {
        Ok(self.chapters.read().get(novel_id).cloned().unwrap_or_default())
    }

    async fn add_notification(&self, notification: Notification) -> Result<()> {
        self.notifications.write().insert(0, notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(novel_id: &str, index: usize, read: bool) -> ChapterRecord {
        ChapterRecord {
            id: ChapterRecord::make_id(novel_id, index),
            novel_id: novel_id.to_string(),
            title: format!("Chapter {index}"),
            content: format!("正文 {index}"),
            order_index: index,
            source_url: format!("https://example.com/{novel_id}/ch-{index}"),
            is_read: read,
            date: None,
        }
    }

    fn novel(id: &str) -> NovelRecord {
        NovelRecord {
            id: id.to_string(),
            title: format!("作品 {id}"),
            author: None,
            cover_url: None,
            summary: None,
            status: None,
            category: crate::core::model::Category::Novel,
            source_url: format!("https://example.com/novel/{id}"),
            total_chapters: 0,
            last_fetched_at: 0,
        }
    }

    #[tokio::test]
    async fn bulk_write_preserves_read_flags() {
        let lib = MemoryLibrary::new();
        lib.add_chapter(chapter("n1", 1, true)).await.unwrap();

        // 同一章重新写入时 is_read 为 false，合并后仍为已读
        let mut rewrite = chapter("n1", 1, false);
        rewrite.content = "更新过的正文".to_string();
        lib.add_chapters(vec![rewrite, chapter("n1", 2, false)])
            .await
            .unwrap();

        let stored = lib.get_chapters("n1").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].is_read);
        assert_eq!(stored[0].content, "更新过的正文");
        assert!(!stored[1].is_read);
    }

    #[tokio::test]
    async fn chapters_come_back_in_order_index_order() {
        let lib = MemoryLibrary::new();
        lib.add_chapters(vec![chapter("n1", 3, false), chapter("n1", 1, false)])
            .await
            .unwrap();
        lib.add_chapter(chapter("n1", 2, false)).await.unwrap();

        let stored = lib.get_chapters("n1").await.unwrap();
        let order: Vec<usize> = stored.iter().map(|c| c.order_index).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn existence_checks_use_source_urls() {
        let lib = MemoryLibrary::new();
        lib.add_chapter(chapter("n1", 1, false)).await.unwrap();
        assert!(
            lib.is_chapter_exists("n1", "https://example.com/n1/ch-1")
                .await
                .unwrap()
        );
        assert!(
            !lib.is_chapter_exists("n1", "https://example.com/n1/ch-9")
                .await
                .unwrap()
        );
        assert!(
            !lib.is_chapter_exists("n2", "https://example.com/n1/ch-1")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn fs_library_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let lib = FsLibrary::open(dir.path()).await.unwrap();

        lib.add_novel(novel("n1")).await.unwrap();
        lib.add_chapters(vec![chapter("n1", 1, false), chapter("n1", 2, false)])
            .await
            .unwrap();

        let got = lib.get_novel("n1").await.unwrap().unwrap();
        assert_eq!(got.title, "作品 n1");
        assert_eq!(lib.get_chapters("n1").await.unwrap().len(), 2);
        assert!(
            lib.is_chapter_exists("n1", "https://example.com/n1/ch-2")
                .await
                .unwrap()
        );
        assert_eq!(lib.list_novels().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fs_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let lib = FsLibrary::open(dir.path()).await.unwrap();
            lib.add_chapter(chapter("n1", 1, false)).await.unwrap();
        }
        let reopened = FsLibrary::open(dir.path()).await.unwrap();
        assert!(
            reopened
                .is_chapter_exists("n1", "https://example.com/n1/ch-1")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn notifications_are_newest_first() {
        let lib = MemoryLibrary::new();
        lib.add_notification(Notification::scrape("先", "1")).await.unwrap();
        lib.add_notification(Notification::scrape("后", "2")).await.unwrap();
        let notes = lib.notifications();
        assert_eq!(notes[0].title, "后");
        assert_eq!(notes[1].title, "先");
    }
}
