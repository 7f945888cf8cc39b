//! Kagane 适配器 (HTML 形态 D)
//!
//! madara 主题站：WordPress 漫画模板的固定选择器集。
//! 列表新章在前，发现序要按时间正序用，整表倒转一次。

use std::sync::OnceLock;

use async_trait::async_trait;
use indexmap::IndexMap;
use scraper::{ElementRef, Html, Selector};
use tracing::info;

use crate::core::error::{Result, ScrapeError};
use crate::core::model::{ChapterBody, ChapterRef, WorkMetadata};
use crate::extract::content;
use crate::sites::{Site, SiteContext, SiteKind};

const CHAPTER_SELECTORS: &[&str] = &[
    "#chapterlist li a",
    ".wp-manga-chapter a",
    ".eph-num a",
    ".listing-chapters_wrap a",
    ".version-chap a",
    "ul.main li a",
];

struct MadaraSelectors {
    titles: Vec<Selector>,
    covers: Vec<Selector>,
    authors: Vec<Selector>,
    statuses: Vec<Selector>,
    summaries: Vec<Selector>,
    chapters: Vec<Selector>,
    chapter_num: Selector,
    chapter_title: Selector,
}

static SELECTORS: OnceLock<MadaraSelectors> = OnceLock::new();

impl MadaraSelectors {
    fn get() -> &'static MadaraSelectors {
        fn parse_all(list: &[&str]) -> Vec<Selector> {
            list.iter().map(|s| Selector::parse(s).unwrap()).collect()
        }
        SELECTORS.get_or_init(|| MadaraSelectors {
            titles: parse_all(&["h1.entry-title", ".post-title h1", "h1"]),
            covers: parse_all(&[".thumb img", ".summary_image img", "img.wp-post-image"]),
            authors: parse_all(&[".author-content a", ".author-content"]),
            statuses: parse_all(&[".post-status .summary-content", ".status .summary-content"]),
            summaries: parse_all(&[
                ".summary__content p",
                ".description-summary .summary__content",
            ]),
            chapters: parse_all(CHAPTER_SELECTORS),
            chapter_num: Selector::parse(".chapternum").unwrap(),
            chapter_title: Selector::parse(".chapter-manhwa-title").unwrap(),
        })
    }
}

fn first_text(doc: &Html, cascade: &[Selector]) -> Option<String> {
    cascade.iter().find_map(|sel| {
        doc.select(sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

fn first_image(doc: &Html, cascade: &[Selector]) -> Option<String> {
    cascade.iter().find_map(|sel| {
        doc.select(sel).next().and_then(|el| {
            el.value()
                .attr("data-src")
                .or_else(|| el.value().attr("src"))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
    })
}

fn anchor_title(a: &ElementRef, s: &MadaraSelectors) -> String {
    a.select(&s.chapter_num)
        .next()
        .or_else(|| a.select(&s.chapter_title).next())
        .map(|el| el.text().collect::<String>())
        .unwrap_or_else(|| a.text().collect::<String>())
        .trim()
        .to_string()
}

pub(crate) fn parse_details(html: &str, url: &str) -> Result<WorkMetadata> {
    let doc = Html::parse_document(html);
    let s = MadaraSelectors::get();

    let title = first_text(&doc, &s.titles)
        .ok_or_else(|| ScrapeError::ExtractionMiss(format!("madara 详情页缺少标题: {url}")))?;

    // 级联逐个试，首个命中的选择器独占整张表
    let mut chapters: IndexMap<String, ChapterRef> = IndexMap::new();
    for sel in &s.chapters {
        for a in doc.select(sel) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            let ch_title = anchor_title(&a, s);
            if ch_title.is_empty() || chapters.contains_key(href) {
                continue;
            }
            chapters.insert(
                href.to_string(),
                ChapterRef::new(ch_title, href.to_string()),
            );
        }
        if !chapters.is_empty() {
            break;
        }
    }

    // 新章在前，倒转成阅读序
    let mut chapters: Vec<ChapterRef> = chapters.into_values().collect();
    chapters.reverse();

    info!("madara 详情解析出 {} 章: {}", chapters.len(), title);

    Ok(WorkMetadata {
        title,
        author: first_text(&doc, &s.authors),
        cover_url: first_image(&doc, &s.covers),
        summary: first_text(&doc, &s.summaries),
        status: first_text(&doc, &s.statuses),
        category: SiteKind::Kagane.default_category(),
        chapters,
        publishers: Vec::new(),
        selected_publisher: None,
        source_url: url.to_string(),
        source_id: url.to_string(),
    })
}

pub struct KaganeSite {
    ctx: SiteContext,
}

impl KaganeSite {
    pub fn new(ctx: SiteContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Site for KaganeSite {
    fn kind(&self) -> SiteKind {
        SiteKind::Kagane
    }

    async fn fetch_details(&self, url: &str) -> Result<WorkMetadata> {
        let html = self.ctx.get(url).await?;
        parse_details(&html, url)
    }

    async fn fetch_chapter_list(&self, url: &str) -> Result<Vec<ChapterRef>> {
        Ok(self.fetch_details(url).await?.chapters)
    }

    async fn fetch_chapter_content(&self, url: &str) -> Result<ChapterBody> {
        let images = content::extract_image_chapter(&self.ctx.http, url, &self.ctx.images).await?;
        Ok(ChapterBody::Images(images))
    }
}
