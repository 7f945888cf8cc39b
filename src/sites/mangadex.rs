//! MangaDex 适配器 (Catalog A)
//!
//! 结构化 JSON 目录：分页章节 feed + 翻译语言过滤 + at-home 图片清单。
//! API 自身保证页序，不过图片分类器。

use std::collections::HashMap;

use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::core::error::{Result, ScrapeError};
use crate::core::model::{ChapterBody, ChapterRef, WorkMetadata};
use crate::sites::{Site, SiteContext, SiteKind};

const API_BASE: &str = "https://api.mangadex.org";
const SITE_BASE: &str = "https://mangadex.org";
const COVER_BASE: &str = "https://uploads.mangadex.org/covers";
const FEED_PAGE_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
struct MdCollection<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct MdSingle<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct MdManga {
    id: String,
    attributes: MdMangaAttrs,
    #[serde(default)]
    relationships: Vec<MdRelationship>,
}

#[derive(Debug, Deserialize)]
struct MdMangaAttrs {
    #[serde(default)]
    title: HashMap<String, String>,
    #[serde(default)]
    description: HashMap<String, String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MdRelationship {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Option<MdRelAttrs>,
}

#[derive(Debug, Default, Deserialize)]
struct MdRelAttrs {
    #[serde(default, rename = "fileName")]
    file_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MdChapter {
    id: String,
    attributes: MdChapterAttrs,
    #[serde(default)]
    relationships: Vec<MdRelationship>,
}

#[derive(Debug, Deserialize)]
struct MdChapterAttrs {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    chapter: Option<String>,
    #[serde(default, rename = "publishAt")]
    publish_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MdAtHome {
    #[serde(rename = "baseUrl")]
    base_url: String,
    chapter: MdAtHomeChapter,
}

#[derive(Debug, Deserialize)]
struct MdAtHomeChapter {
    hash: String,
    #[serde(default)]
    data: Vec<String>,
}

fn rel_attr<'a>(
    rels: &'a [MdRelationship],
    kind: &str,
    pick: impl Fn(&'a MdRelAttrs) -> Option<&'a str>,
) -> Option<&'a str> {
    rels.iter()
        .find(|r| r.kind == kind)
        .and_then(|r| r.attributes.as_ref())
        .and_then(pick)
}

fn map_manga(manga: &MdManga) -> WorkMetadata {
    let attrs = &manga.attributes;
    let title = attrs
        .title
        .get("en")
        .or_else(|| attrs.title.values().next())
        .cloned()
        .unwrap_or_else(|| "Unknown Title".to_string());
    let summary = attrs
        .description
        .get("en")
        .or_else(|| attrs.description.values().next())
        .cloned();

    let cover_url = rel_attr(&manga.relationships, "cover_art", |a| {
        a.file_name.as_deref()
    })
    .map(|file| format!("{COVER_BASE}/{}/{file}.256.jpg", manga.id));

    let author =
        rel_attr(&manga.relationships, "author", |a| a.name.as_deref()).map(str::to_string);

    WorkMetadata {
        title,
        author,
        cover_url,
        summary,
        status: attrs.status.clone(),
        category: SiteKind::MangaDex.default_category(),
        chapters: Vec::new(),
        publishers: Vec::new(),
        selected_publisher: None,
        source_url: format!("{SITE_BASE}/title/{}", manga.id),
        source_id: manga.id.clone(),
    }
}

/// `Ch. {num}{ - title}{ [group]}`，无章号的单篇记为 Oneshot
fn format_chapter_title(ch: &MdChapter) -> String {
    let num = ch
        .attributes
        .chapter
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or("Oneshot");
    let title_part = ch
        .attributes
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(|t| format!(" - {t}"))
        .unwrap_or_default();
    let group_part = rel_attr(&ch.relationships, "scanlation_group", |a| {
        a.name.as_deref()
    })
    .map(|g| format!(" [{g}]"))
    .unwrap_or_default();
    format!("Ch. {num}{title_part}{group_part}")
}

fn map_chapter(ch: &MdChapter) -> ChapterRef {
    ChapterRef {
        title: format_chapter_title(ch),
        url: format!("{SITE_BASE}/chapter/{}", ch.id),
        date: ch
            .attributes
            .publish_at
            .as_deref()
            .and_then(|d| d.split('T').next())
            .map(str::to_string),
    }
}

/// 从 `/title/{id}` 或 `/chapter/{id}` 形态的 URL 里取资源 ID
fn resource_id(url: &str, segment: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| ScrapeError::Parse(format!("无效的 MangaDex URL: {e}")))?;
    let mut segments = parsed
        .path_segments()
        .ok_or_else(|| ScrapeError::Parse(format!("MangaDex URL 缺少路径: {url}")))?;
    segments
        .find(|s| *s == segment)
        .and_then(|_| segments.next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ScrapeError::Parse(format!("MangaDex URL 里找不到 {segment} ID: {url}")))
}

pub struct MangaDexSite {
    ctx: SiteContext,
}

impl MangaDexSite {
    pub fn new(ctx: SiteContext) -> Self {
        Self { ctx }
    }

    async fn fetch_feed(&self, manga_id: &str) -> Result<Vec<ChapterRef>> {
        let lang = &self.ctx.config.scrape.translated_language;
        let mut refs = Vec::new();
        let mut offset = 0usize;

        loop {
            let url = format!(
                "{API_BASE}/manga/{manga_id}/feed?translatedLanguage[]={lang}\
                 &order[chapter]=asc&limit={FEED_PAGE_LIMIT}&offset={offset}\
                 &includes[]=scanlation_group"
            );
            let page: MdCollection<MdChapter> = self.ctx.get_json(&url).await?;
            let fetched = page.data.len();
            refs.extend(page.data.iter().map(map_chapter));
            offset += fetched;
            if fetched < FEED_PAGE_LIMIT || offset >= page.total {
                break;
            }
        }

        info!("MangaDex feed 共 {} 章 ({})", refs.len(), manga_id);
        Ok(refs)
    }
}

#[async_trait]
impl Site for MangaDexSite {
    fn kind(&self) -> SiteKind {
        SiteKind::MangaDex
    }

    async fn search(&self, query: &str) -> Result<Vec<WorkMetadata>> {
        let encoded = utf8_percent_encode(query, NON_ALPHANUMERIC);
        let url = format!(
            "{API_BASE}/manga?title={encoded}&limit=20&includes[]=cover_art&includes[]=author\
             &contentRating[]=safe&contentRating[]=suggestive&contentRating[]=erotica\
             &order[relevance]=desc"
        );
        let list: MdCollection<MdManga> = self.ctx.get_json(&url).await?;
        Ok(list.data.iter().map(map_manga).collect())
    }

    async fn fetch_details(&self, url: &str) -> Result<WorkMetadata> {
        let id = resource_id(url, "title")?;
        let detail_url = format!("{API_BASE}/manga/{id}?includes[]=cover_art&includes[]=author");
        let single: MdSingle<MdManga> = self.ctx.get_json(&detail_url).await?;
        let mut meta = map_manga(&single.data);
        meta.chapters = self.fetch_feed(&id).await?;
        Ok(meta)
    }

    async fn fetch_chapter_list(&self, url: &str) -> Result<Vec<ChapterRef>> {
        let id = resource_id(url, "title")?;
        self.fetch_feed(&id).await
    }

    async fn fetch_chapter_content(&self, url: &str) -> Result<ChapterBody> {
        let chapter_id = resource_id(url, "chapter")?;
        let at_home: MdAtHome = self
            .ctx
            .get_json(&format!("{API_BASE}/at-home/server/{chapter_id}"))
            .await?;
        let images: Vec<String> = at_home
            .chapter
            .data
            .iter()
            .map(|file| {
                format!(
                    "{}/data/{}/{file}",
                    at_home.base_url, at_home.chapter.hash
                )
            })
            .collect();
        Ok(ChapterBody::Images(images))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture_manga() -> MdManga {
        serde_json::from_value(json!({
            "id": "b73b0328-1111-4444-8888-9c7e3f1a2b3c",
            "attributes": {
                "title": { "en": "Solo Leveling" },
                "description": { "en": "Hunters and gates." },
                "status": "completed"
            },
            "relationships": [
                { "type": "cover_art", "attributes": { "fileName": "cover.jpg" } },
                { "type": "author", "attributes": { "name": "Chugong" } }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn manga_json_maps_to_metadata() {
        let meta = map_manga(&fixture_manga());
        assert_eq!(meta.title, "Solo Leveling");
        assert_eq!(meta.author.as_deref(), Some("Chugong"));
        assert_eq!(
            meta.cover_url.as_deref(),
            Some(
                "https://uploads.mangadex.org/covers/b73b0328-1111-4444-8888-9c7e3f1a2b3c/cover.jpg.256.jpg"
            )
        );
        assert_eq!(meta.status.as_deref(), Some("completed"));
        assert_eq!(
            meta.source_url,
            "https://mangadex.org/title/b73b0328-1111-4444-8888-9c7e3f1a2b3c"
        );
    }

    #[test]
    fn chapter_titles_carry_number_title_and_group() {
        let ch: MdChapter = serde_json::from_value(json!({
            "id": "c1",
            "attributes": { "chapter": "12", "title": "Awakening", "publishAt": "2024-01-05T08:00:00+00:00" },
            "relationships": [
                { "type": "scanlation_group", "attributes": { "name": "Asura" } }
            ]
        }))
        .unwrap();
        let r = map_chapter(&ch);
        assert_eq!(r.title, "Ch. 12 - Awakening [Asura]");
        assert_eq!(r.url, "https://mangadex.org/chapter/c1");
        assert_eq!(r.date.as_deref(), Some("2024-01-05"));
    }

    #[test]
    fn chapters_without_number_become_oneshot() {
        let ch: MdChapter = serde_json::from_value(json!({
            "id": "c2",
            "attributes": { "chapter": "", "title": null }
        }))
        .unwrap();
        assert_eq!(format_chapter_title(&ch), "Ch. Oneshot");
    }

    #[test]
    fn resource_ids_come_from_url_paths() {
        assert_eq!(
            resource_id("https://mangadex.org/title/abc-123/solo-leveling", "title").unwrap(),
            "abc-123"
        );
        assert_eq!(
            resource_id("https://mangadex.org/chapter/c9", "chapter").unwrap(),
            "c9"
        );
        assert!(resource_id("https://mangadex.org/about", "title").is_err());
    }
}
