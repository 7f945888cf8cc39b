//! Asura 适配器 (HTML 形态 C)
//!
//! Next.js 站点：详情与搜索走 Tailwind 风格的标记选择器，
//! 章节图片藏在 __NEXT_DATA__ 水合脚本里而不是 DOM。

use std::sync::OnceLock;

use async_trait::async_trait;
use indexmap::IndexSet;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use crate::core::error::{Result, ScrapeError};
use crate::core::model::{ChapterBody, ChapterRef, WorkMetadata};
use crate::sites::{Site, SiteContext, SiteKind};

const BASE_URL: &str = "https://asuracomic.net";
/// 章节图片所在的内容 CDN
const CONTENT_CDN: &str = "gg.asuracomic.net";

struct AsuraSelectors {
    search_card: Selector,
    card_title: Selector,
    card_img: Selector,
    card_status: Selector,
    detail_title: Selector,
    detail_cover: Selector,
    detail_summary: Selector,
    info_block: Selector,
    info_label: Selector,
    chapter_link: Selector,
    chapter_title: Selector,
    chapter_date: Selector,
    next_data: Selector,
}

static SELECTORS: OnceLock<AsuraSelectors> = OnceLock::new();

impl AsuraSelectors {
    fn get() -> &'static AsuraSelectors {
        SELECTORS.get_or_init(|| AsuraSelectors {
            search_card: Selector::parse(r#"div.grid a[href*="/series/"]"#).unwrap(),
            card_title: Selector::parse("span.font-bold").unwrap(),
            card_img: Selector::parse("img").unwrap(),
            card_status: Selector::parse("span.status").unwrap(),
            detail_title: Selector::parse("span.text-xl.font-bold").unwrap(),
            detail_cover: Selector::parse(r#"img[alt="poster"]"#).unwrap(),
            detail_summary: Selector::parse("span.font-medium.text-sm p").unwrap(),
            info_block: Selector::parse("div").unwrap(),
            info_label: Selector::parse("h3").unwrap(),
            chapter_link: Selector::parse("div.overflow-y-auto a[href]").unwrap(),
            chapter_title: Selector::parse("h3.text-sm").unwrap(),
            chapter_date: Selector::parse("h3.text-xs").unwrap(),
            next_data: Selector::parse("script#__NEXT_DATA__").unwrap(),
        })
    }
}

static IMAGE_URL: OnceLock<Regex> = OnceLock::new();

fn image_url_re() -> &'static Regex {
    IMAGE_URL
        .get_or_init(|| Regex::new(r#"(?i)https?://[^"'\s\\]+\.(?:jpg|jpeg|png|webp|avif)"#).unwrap())
}

/// 标签对扫描：找 label h3 对应的 value h3
fn labelled_value(doc: &Html, label: &str) -> Option<String> {
    let s = AsuraSelectors::get();
    for block in doc.select(&s.info_block) {
        let mut h3s = block.select(&s.info_label);
        let Some(first) = h3s.next() else { continue };
        if !first.text().collect::<String>().contains(label) {
            continue;
        }
        let value = h3s
            .last()
            .map(|el| el.text().collect::<String>().trim().to_string())?;
        if !value.is_empty() && value != label {
            return Some(value);
        }
    }
    None
}

/// 章节链接相对 `/series/` 补全（Asura 的 href 自带系列 slug）
fn chapter_url(href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{BASE_URL}/series/{}", href.trim_start_matches('/'))
    }
}

fn collapse_ws(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn parse_details(html: &str, url: &str) -> Result<WorkMetadata> {
    let doc = Html::parse_document(html);
    let s = AsuraSelectors::get();

    let title = doc
        .select(&s.detail_title)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ScrapeError::ExtractionMiss(format!("Asura 详情页缺少标题: {url}")))?;

    let cover_url = doc
        .select(&s.detail_cover)
        .next()
        .and_then(|el| el.value().attr("src"))
        .map(str::to_string);

    let summary = doc
        .select(&s.detail_summary)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let chapters: Vec<ChapterRef> = doc
        .select(&s.chapter_link)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let title = a
                .select(&s.chapter_title)
                .next()
                .map(|el| collapse_ws(&el.text().collect::<String>()))
                .filter(|t| !t.is_empty())?;
            let date = a
                .select(&s.chapter_date)
                .next()
                .map(|el| collapse_ws(&el.text().collect::<String>()))
                .filter(|d| !d.is_empty());
            Some(ChapterRef {
                title,
                url: chapter_url(href),
                date,
            })
        })
        .collect();

    Ok(WorkMetadata {
        title,
        author: labelled_value(&doc, "Author"),
        cover_url,
        summary,
        status: labelled_value(&doc, "Status"),
        category: SiteKind::Asura.default_category(),
        chapters,
        publishers: Vec::new(),
        selected_publisher: None,
        source_url: url.to_string(),
        source_id: url.to_string(),
    })
}

/// 水合脚本里的图源：顺序可信，只剔 gif 和站标
pub(crate) fn images_from_next_data(html: &str) -> Option<Vec<String>> {
    let doc = Html::parse_document(html);
    let s = AsuraSelectors::get();
    // JSON 序列化会把斜杠转义成 \/，先还原再扫
    let payload = doc
        .select(&s.next_data)
        .next()
        .map(|el| el.text().collect::<String>())?
        .replace("\\/", "/");

    let images: Vec<String> = image_url_re()
        .find_iter(&payload)
        .map(|m| m.as_str().to_string())
        .filter(|u| u.contains(CONTENT_CDN))
        .filter(|u| {
            let lower = u.to_lowercase();
            !lower.ends_with(".gif") && !lower.contains("logo")
        })
        .collect::<IndexSet<String>>()
        .into_iter()
        .collect();

    if images.is_empty() { None } else { Some(images) }
}

/// 兜底：整页正则扫 CDN 图源，再过分类器
pub(crate) fn images_from_page_scan(html: &str) -> Vec<String> {
    image_url_re()
        .find_iter(html)
        .map(|m| m.as_str().to_string())
        .filter(|u| {
            u.contains(CONTENT_CDN)
                && !u.contains("logo")
                && !u.contains("icon")
                && !u.contains("thumb")
                && !u.contains("avatar")
                && !u.contains("cover")
        })
        .collect::<IndexSet<String>>()
        .into_iter()
        .collect()
}

pub struct AsuraSite {
    ctx: SiteContext,
}

impl AsuraSite {
    pub fn new(ctx: SiteContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Site for AsuraSite {
    fn kind(&self) -> SiteKind {
        SiteKind::Asura
    }

    async fn search(&self, query: &str) -> Result<Vec<WorkMetadata>> {
        let encoded = utf8_percent_encode(query, NON_ALPHANUMERIC);
        let url = format!("{BASE_URL}/series?page=1&name={encoded}");
        let html = self.ctx.get(&url).await?;
        let doc = Html::parse_document(&html);
        let s = AsuraSelectors::get();

        let mut results = Vec::new();
        for card in doc.select(&s.search_card) {
            let Some(href) = card.value().attr("href") else {
                continue;
            };
            let Some(title) = card
                .select(&s.card_title)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
            else {
                continue;
            };
            let source_url = if href.starts_with("http") {
                href.to_string()
            } else {
                format!("{BASE_URL}/{}", href.trim_start_matches('/'))
            };
            results.push(WorkMetadata {
                title,
                author: None,
                cover_url: card
                    .select(&s.card_img)
                    .next()
                    .and_then(|img| img.value().attr("src"))
                    .map(str::to_string),
                summary: None,
                status: card
                    .select(&s.card_status)
                    .next()
                    .map(|el| el.text().collect::<String>().trim().to_string())
                    .filter(|t| !t.is_empty()),
                category: SiteKind::Asura.default_category(),
                chapters: Vec::new(),
                publishers: Vec::new(),
                selected_publisher: None,
                source_url: source_url.clone(),
                source_id: source_url,
            });
        }
        Ok(results)
    }

    async fn fetch_details(&self, url: &str) -> Result<WorkMetadata> {
        let html = self.ctx.get(url).await?;
        parse_details(&html, url)
    }

    async fn fetch_chapter_list(&self, url: &str) -> Result<Vec<ChapterRef>> {
        Ok(self.fetch_details(url).await?.chapters)
    }

    async fn fetch_chapter_content(&self, url: &str) -> Result<ChapterBody> {
        let html = self.ctx.get(url).await?;

        if let Some(images) = images_from_next_data(&html) {
            debug!("Asura 水合脚本给出 {} 张图", images.len());
            return Ok(ChapterBody::Images(images));
        }

        let scanned = images_from_page_scan(&html);
        Ok(ChapterBody::Images(
            self.ctx.images.filter_content_images(&scanned),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_links_are_resolved_under_series() {
        assert_eq!(
            chapter_url("solo-leveling-a4b483cd/chapter/200"),
            "https://asuracomic.net/series/solo-leveling-a4b483cd/chapter/200"
        );
        assert_eq!(
            chapter_url("https://asuracomic.net/series/x/chapter/1"),
            "https://asuracomic.net/series/x/chapter/1"
        );
    }

    #[test]
    fn details_parse_from_nextjs_markup() {
        let html = r#"
            <span class="text-xl font-bold">Solo Leveling</span>
            <img alt="poster" src="https://gg.asuracomic.net/storage/media/poster.webp">
            <span class="font-medium text-sm"><p>E-rank hunter.</p></span>
            <div><h3>Status</h3><h3>Ongoing</h3></div>
            <div><h3>Author</h3><h3>Chugong</h3></div>
            <div class="overflow-y-auto">
              <a href="solo-leveling-a4b483cd/chapter/2">
                <h3 class="text-sm">Chapter 2</h3><h3 class="text-xs">Feb 2nd 2024</h3>
              </a>
              <a href="solo-leveling-a4b483cd/chapter/1">
                <h3 class="text-sm">Chapter 1</h3><h3 class="text-xs">Feb 1st 2024</h3>
              </a>
            </div>
        "#;
        let meta = parse_details(html, "https://asuracomic.net/series/solo-leveling-a4b483cd")
            .unwrap();
        assert_eq!(meta.title, "Solo Leveling");
        assert_eq!(meta.author.as_deref(), Some("Chugong"));
        assert_eq!(meta.status.as_deref(), Some("Ongoing"));
        assert_eq!(meta.chapters.len(), 2);
        assert_eq!(
            meta.chapters[0].url,
            "https://asuracomic.net/series/solo-leveling-a4b483cd/chapter/2"
        );
        assert_eq!(meta.chapters[1].date.as_deref(), Some("Feb 1st 2024"));
    }

    #[test]
    fn hydration_payload_images_keep_order_and_drop_logos() {
        let html = r#"
            <script id="__NEXT_DATA__" type="application/json">
              {"props":{"images":[
                "https:\/\/gg.asuracomic.net\/storage\/media\/01.webp",
                "https:\/\/gg.asuracomic.net\/storage\/media\/logo.png",
                "https:\/\/gg.asuracomic.net\/storage\/media\/02.webp",
                "https:\/\/cdn.other.com\/banner.jpg"
              ]}}
            </script>
        "#;
        let images = images_from_next_data(html).unwrap();
        assert_eq!(
            images,
            vec![
                "https://gg.asuracomic.net/storage/media/01.webp".to_string(),
                "https://gg.asuracomic.net/storage/media/02.webp".to_string()
            ]
        );
    }

    #[test]
    fn page_scan_fallback_is_cdn_restricted() {
        let html = r#"
            <img src="https://gg.asuracomic.net/storage/media/003.webp">
            <img src="https://gg.asuracomic.net/storage/media/003.webp">
            <img src="https://ads.example.com/banner.jpg">
            <img src="https://gg.asuracomic.net/storage/media/thumb-small.webp">
        "#;
        let images = images_from_page_scan(html);
        assert_eq!(
            images,
            vec!["https://gg.asuracomic.net/storage/media/003.webp".to_string()]
        );
    }
}
