//! Comick 适配器 (Catalog B)
//!
//! 带发布方元数据的社区目录 API：同一作品可能有多个汉化组各自发布，
//! 详情聚合全部发布方，导入前按用户选定的一家二次过滤。

use async_trait::async_trait;
use indexmap::IndexSet;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::core::error::{Result, ScrapeError};
use crate::core::model::{ChapterBody, ChapterRef, WorkMetadata};
use crate::sites::{Site, SiteContext, SiteKind};

const API_BASE: &str = "https://api.comick.fun";
const SITE_BASE: &str = "https://comick.io";
const IMAGE_CDN: &str = "https://meo.comick.pictures";
const CHAPTER_PAGE_LIMIT: usize = 300;

#[derive(Debug, Deserialize)]
struct CkSearchEntry {
    slug: String,
    title: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    md_covers: Vec<CkCover>,
}

#[derive(Debug, Deserialize)]
struct CkCover {
    b2key: String,
}

#[derive(Debug, Deserialize)]
struct CkComicWrap {
    comic: CkComic,
    #[serde(default)]
    authors: Vec<CkAuthor>,
}

#[derive(Debug, Deserialize)]
struct CkComic {
    hid: String,
    slug: String,
    title: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    status: Option<u8>,
    #[serde(default)]
    md_covers: Vec<CkCover>,
}

#[derive(Debug, Deserialize)]
struct CkAuthor {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CkChapterPage {
    #[serde(default)]
    chapters: Vec<CkChapter>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct CkChapter {
    hid: String,
    #[serde(default)]
    chap: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    group_name: Option<Vec<String>>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CkChapterDetailWrap {
    chapter: CkChapterDetail,
}

#[derive(Debug, Deserialize)]
struct CkChapterDetail {
    #[serde(default)]
    md_images: Vec<CkImage>,
}

#[derive(Debug, Deserialize)]
struct CkImage {
    b2key: String,
}

fn cover_url(covers: &[CkCover]) -> Option<String> {
    covers.first().map(|c| format!("{IMAGE_CDN}/{}", c.b2key))
}

fn status_label(status: Option<u8>) -> Option<String> {
    match status {
        Some(1) => Some("Ongoing".to_string()),
        Some(2) => Some("Completed".to_string()),
        _ => None,
    }
}

fn chapter_title(ch: &CkChapter) -> String {
    let num = ch.chap.as_deref().filter(|c| !c.is_empty()).unwrap_or("?");
    let title_part = ch
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(|t| format!(" - {t}"))
        .unwrap_or_default();
    format!("Ch. {num}{title_part}")
}

fn map_chapter(slug: &str, ch: &CkChapter) -> ChapterRef {
    ChapterRef {
        title: chapter_title(ch),
        url: format!("{SITE_BASE}/comic/{slug}/{}", ch.hid),
        date: ch
            .created_at
            .as_deref()
            .and_then(|d| d.split('T').next())
            .map(str::to_string),
    }
}

/// `/comic/{slug}` 形态 URL 取 slug
fn slug_from(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| ScrapeError::Parse(format!("无效的 Comick URL: {e}")))?;
    let mut segments = parsed
        .path_segments()
        .ok_or_else(|| ScrapeError::Parse(format!("Comick URL 缺少路径: {url}")))?;
    segments
        .find(|s| *s == "comic")
        .and_then(|_| segments.next())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ScrapeError::Parse(format!("Comick URL 里找不到 slug: {url}")))
}

/// 章节页 URL 的末段即章节 hid（本适配器自己生成的地址形态）
fn chapter_hid_from(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| ScrapeError::Parse(format!("无效的 Comick 章节 URL: {e}")))?;
    parsed
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ScrapeError::Parse(format!("Comick 章节 URL 缺少 hid: {url}")))
}

pub struct ComickSite {
    ctx: SiteContext,
}

impl ComickSite {
    pub fn new(ctx: SiteContext) -> Self {
        Self { ctx }
    }

    async fn fetch_comic(&self, slug: &str) -> Result<CkComicWrap> {
        self.ctx
            .get_json(&format!("{API_BASE}/comic/{slug}"))
            .await
    }

    async fn fetch_all_chapters(&self, hid: &str) -> Result<Vec<CkChapter>> {
        let lang = &self.ctx.config.scrape.translated_language;
        let mut all = Vec::new();
        let mut page = 1usize;

        loop {
            let url = format!(
                "{API_BASE}/comic/{hid}/chapters?lang={lang}&limit={CHAPTER_PAGE_LIMIT}&page={page}"
            );
            let batch: CkChapterPage = self.ctx.get_json(&url).await?;
            let fetched = batch.chapters.len();
            all.extend(batch.chapters);
            if fetched < CHAPTER_PAGE_LIMIT || all.len() >= batch.total {
                break;
            }
            page += 1;
        }

        Ok(all)
    }
}

#[async_trait]
impl Site for ComickSite {
    fn kind(&self) -> SiteKind {
        SiteKind::Comick
    }

    async fn search(&self, query: &str) -> Result<Vec<WorkMetadata>> {
        let encoded = utf8_percent_encode(query, NON_ALPHANUMERIC);
        let url = format!("{API_BASE}/v1.0/search?q={encoded}&limit=20&type=comic");
        let entries: Vec<CkSearchEntry> = self.ctx.get_json(&url).await?;

        Ok(entries
            .into_iter()
            .map(|e| WorkMetadata {
                title: e.title,
                author: None,
                cover_url: cover_url(&e.md_covers),
                summary: e.desc,
                status: None,
                category: SiteKind::Comick.default_category(),
                chapters: Vec::new(),
                publishers: Vec::new(),
                selected_publisher: None,
                source_url: format!("{SITE_BASE}/comic/{}", e.slug),
                source_id: e.slug,
            })
            .collect())
    }

    async fn fetch_details(&self, url: &str) -> Result<WorkMetadata> {
        let slug = slug_from(url)?;
        let wrap = self.fetch_comic(&slug).await?;
        let chapters = self.fetch_all_chapters(&wrap.comic.hid).await?;

        // 聚合全部发布方，保持出现顺序
        let publishers: IndexSet<String> = chapters
            .iter()
            .flat_map(|c| c.group_name.iter().flatten())
            .cloned()
            .collect();

        info!(
            "Comick {} 共 {} 章，{} 个发布方",
            wrap.comic.slug,
            chapters.len(),
            publishers.len()
        );

        Ok(WorkMetadata {
            title: wrap.comic.title,
            author: wrap.authors.first().map(|a| a.name.clone()),
            cover_url: cover_url(&wrap.comic.md_covers),
            summary: wrap.comic.desc,
            status: status_label(wrap.comic.status),
            category: SiteKind::Comick.default_category(),
            chapters: chapters
                .iter()
                .map(|c| map_chapter(&wrap.comic.slug, c))
                .collect(),
            publishers: publishers.into_iter().collect(),
            selected_publisher: None,
            source_url: format!("{SITE_BASE}/comic/{}", wrap.comic.slug),
            source_id: wrap.comic.hid,
        })
    }

    async fn fetch_chapter_list(&self, url: &str) -> Result<Vec<ChapterRef>> {
        let slug = slug_from(url)?;
        let wrap = self.fetch_comic(&slug).await?;
        let chapters = self.fetch_all_chapters(&wrap.comic.hid).await?;
        Ok(chapters
            .iter()
            .map(|c| map_chapter(&wrap.comic.slug, c))
            .collect())
    }

    async fn fetch_chapter_list_for_publisher(
        &self,
        url: &str,
        publisher: &str,
    ) -> Result<Vec<ChapterRef>> {
        let slug = slug_from(url)?;
        let wrap = self.fetch_comic(&slug).await?;
        let chapters = self.fetch_all_chapters(&wrap.comic.hid).await?;
        Ok(chapters
            .iter()
            .filter(|c| {
                c.group_name
                    .as_deref()
                    .is_some_and(|groups| groups.iter().any(|g| g == publisher))
            })
            .map(|c| map_chapter(&wrap.comic.slug, c))
            .collect())
    }

    async fn fetch_chapter_content(&self, url: &str) -> Result<ChapterBody> {
        let hid = chapter_hid_from(url)?;
        let wrap: CkChapterDetailWrap = self
            .ctx
            .get_json(&format!("{API_BASE}/chapter/{hid}"))
            .await?;
        Ok(ChapterBody::Images(
            wrap.chapter
                .md_images
                .iter()
                .map(|img| format!("{IMAGE_CDN}/{}", img.b2key))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture_chapters() -> Vec<CkChapter> {
        serde_json::from_value(json!([
            { "hid": "h1", "chap": "1", "title": "Start", "group_name": ["Asura"], "created_at": "2024-02-01T00:00:00Z" },
            { "hid": "h2", "chap": "1", "group_name": ["Reaper"] },
            { "hid": "h3", "chap": "2", "group_name": ["Asura"] },
            { "hid": "h4", "chap": "3", "group_name": null }
        ]))
        .unwrap()
    }

    #[test]
    fn chapter_json_maps_to_refs() {
        let refs: Vec<ChapterRef> = fixture_chapters()
            .iter()
            .map(|c| map_chapter("solo-leveling", c))
            .collect();
        assert_eq!(refs[0].title, "Ch. 1 - Start");
        assert_eq!(refs[0].url, "https://comick.io/comic/solo-leveling/h1");
        assert_eq!(refs[0].date.as_deref(), Some("2024-02-01"));
        assert_eq!(refs[3].title, "Ch. 3");
    }

    #[test]
    fn publishers_aggregate_in_order_of_appearance() {
        let chapters = fixture_chapters();
        let publishers: IndexSet<String> = chapters
            .iter()
            .flat_map(|c| c.group_name.iter().flatten())
            .cloned()
            .collect();
        let publishers: Vec<String> = publishers.into_iter().collect();
        assert_eq!(publishers, vec!["Asura".to_string(), "Reaper".to_string()]);
    }

    #[test]
    fn publisher_refilter_keeps_only_selected_group() {
        let chapters = fixture_chapters();
        let filtered: Vec<&CkChapter> = chapters
            .iter()
            .filter(|c| {
                c.group_name
                    .as_deref()
                    .is_some_and(|g| g.iter().any(|x| x == "Asura"))
            })
            .collect();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].hid, "h1");
        assert_eq!(filtered[1].hid, "h3");
    }

    #[test]
    fn slugs_and_hids_come_from_urls() {
        assert_eq!(
            slug_from("https://comick.io/comic/solo-leveling").unwrap(),
            "solo-leveling"
        );
        assert_eq!(
            chapter_hid_from("https://comick.io/comic/solo-leveling/h9").unwrap(),
            "h9"
        );
        assert!(slug_from("https://comick.io/about").is_err());
    }
}
