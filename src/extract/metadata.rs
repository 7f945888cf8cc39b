//! 详情页元数据抽取 (Metadata Extraction)
//!
//! 标题/作者/简介/封面各走一条候选选择器级联，取首个非空命中。
//! 站点模板千差万别，级联顺序从最具体排到最兜底。

use std::sync::OnceLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::core::error::{Result, ScrapeError};
use crate::core::model::{Category, WorkMetadata};
use crate::utils::to_absolute_url;

const TITLE_SELECTORS: &[&str] = &[
    ".novel-info .novel-title",
    ".title",
    "h1",
    "h2.title",
    ".book-name",
    ".truyen-title",
    "meta[property=\"og:title\"]",
];

const AUTHOR_SELECTORS: &[&str] = &[
    ".author a",
    ".author",
    ".novel-author",
    "[itemprop=\"author\"]",
    ".info a[href*=\"author\"]",
];

const SUMMARY_SELECTORS: &[&str] = &[
    ".summary .content",
    ".desc-text",
    ".description",
    "#description",
    ".novel-summary",
    "meta[property=\"og:description\"]",
];

const COVER_SELECTORS: &[&str] = &[
    ".book-img img",
    ".novel-cover img",
    ".cover img",
    ".thumbnail img",
    "img.cover",
    "meta[property=\"og:image\"]",
];

/// 封面懒加载属性的探测顺序，src 放最后
const COVER_ATTRS: &[&str] = &["data-src", "data-original", "src", "content"];

struct DetailSelectors {
    title: Vec<Selector>,
    author: Vec<Selector>,
    summary: Vec<Selector>,
    cover: Vec<Selector>,
}

static SELECTORS: OnceLock<DetailSelectors> = OnceLock::new();

impl DetailSelectors {
    fn get() -> &'static DetailSelectors {
        fn parse_all(list: &[&str]) -> Vec<Selector> {
            list.iter().map(|s| Selector::parse(s).unwrap()).collect()
        }
        SELECTORS.get_or_init(|| DetailSelectors {
            title: parse_all(TITLE_SELECTORS),
            author: parse_all(AUTHOR_SELECTORS),
            summary: parse_all(SUMMARY_SELECTORS),
            cover: parse_all(COVER_SELECTORS),
        })
    }
}

fn element_text(el: &ElementRef) -> String {
    if el.value().name() == "meta" {
        el.value().attr("content").unwrap_or_default().to_string()
    } else {
        el.text().collect::<String>()
    }
}

fn first_text(doc: &Html, cascade: &[Selector]) -> Option<String> {
    for sel in cascade {
        if let Some(el) = doc.select(sel).next() {
            let text = element_text(&el).trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn find_cover(doc: &Html, base: Option<&Url>) -> Option<String> {
    let s = DetailSelectors::get();
    for sel in &s.cover {
        for el in doc.select(sel) {
            for attr in COVER_ATTRS {
                if let Some(v) = el.value().attr(attr) {
                    let v = v.trim();
                    // 行内占位图不是封面
                    if v.is_empty() || v.starts_with("data:image") {
                        continue;
                    }
                    return Some(match base {
                        Some(b) => to_absolute_url(b, v),
                        None => v.to_string(),
                    });
                }
            }
        }
    }
    None
}

/// 从详情页 HTML 抽取作品元数据
///
/// 标题缺失视为整页解析失败；作者/简介/封面缺失按占位处理。
pub fn extract_metadata(html: &str, page_url: &str) -> Result<WorkMetadata> {
    let doc = Html::parse_document(html);
    let s = DetailSelectors::get();
    let base = Url::parse(page_url).ok();

    let title = first_text(&doc, &s.title)
        .map(|t| {
            // 聚合站标题常带 " Novel - Read ..." 营销尾巴
            t.split(" Novel - Read")
                .next()
                .unwrap_or(&t)
                .trim()
                .to_string()
        })
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            ScrapeError::ExtractionMiss(format!("详情页未找到标题: {}", page_url))
        })?;

    let author = first_text(&doc, &s.author)
        .map(|a| {
            a.strip_prefix("Author:")
                .map(|r| r.trim().to_string())
                .unwrap_or(a)
        })
        .filter(|a| !a.is_empty());

    Ok(WorkMetadata {
        title,
        author,
        cover_url: find_cover(&doc, base.as_ref()),
        summary: first_text(&doc, &s.summary),
        status: None,
        category: Category::Novel,
        chapters: Vec::new(),
        publishers: Vec::new(),
        selected_publisher: None,
        source_url: page_url.to_string(),
        source_id: crate::utils::slug_from_url(page_url).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specific_title_selector_wins_over_h1() {
        let html = r#"
            <div class="novel-info"><h3 class="novel-title">Shadow Slave</h3></div>
            <h1>站点导航标题</h1>
        "#;
        let meta = extract_metadata(html, "https://example.com/novel/shadow-slave").unwrap();
        assert_eq!(meta.title, "Shadow Slave");
    }

    #[test]
    fn marketing_suffix_is_stripped_from_title() {
        let html = r#"<h1>Shadow Slave Novel - Read Shadow Slave Online Free</h1>"#;
        let meta = extract_metadata(html, "https://example.com/n").unwrap();
        assert_eq!(meta.title, "Shadow Slave");
    }

    #[test]
    fn author_label_prefix_is_stripped() {
        let html = r#"
            <h1>Some Book</h1>
            <div class="author">Author: Guiltythree</div>
        "#;
        let meta = extract_metadata(html, "https://example.com/n").unwrap();
        assert_eq!(meta.author.as_deref(), Some("Guiltythree"));
    }

    #[test]
    fn missing_author_stays_none() {
        let html = r#"<h1>Some Book</h1>"#;
        let meta = extract_metadata(html, "https://example.com/n").unwrap();
        assert_eq!(meta.author, None);
    }

    #[test]
    fn lazy_loaded_cover_prefers_data_src() {
        let html = r#"
            <h1>Some Book</h1>
            <div class="cover">
              <img src="data:image/gif;base64,R0lGOD" data-src="/covers/b.jpg">
            </div>
        "#;
        let meta = extract_metadata(html, "https://example.com/novel/b").unwrap();
        assert_eq!(
            meta.cover_url.as_deref(),
            Some("https://example.com/covers/b.jpg")
        );
    }

    #[test]
    fn inline_placeholder_cover_is_rejected() {
        let html = r#"
            <h1>Some Book</h1>
            <div class="cover"><img src="data:image/gif;base64,R0lGOD"></div>
        "#;
        let meta = extract_metadata(html, "https://example.com/n").unwrap();
        assert_eq!(meta.cover_url, None);
    }

    #[test]
    fn og_meta_tags_serve_as_last_resort() {
        let html = r#"
            <head>
              <meta property="og:title" content="Meta Book">
              <meta property="og:description" content="一段简介">
              <meta property="og:image" content="https://cdn.example.com/c.jpg">
            </head>
        "#;
        let meta = extract_metadata(html, "https://example.com/n").unwrap();
        assert_eq!(meta.title, "Meta Book");
        assert_eq!(meta.summary.as_deref(), Some("一段简介"));
        assert_eq!(meta.cover_url.as_deref(), Some("https://cdn.example.com/c.jpg"));
    }

    #[test]
    fn missing_title_is_an_extraction_miss() {
        let err = extract_metadata("<div>nothing here</div>", "https://example.com/n").unwrap_err();
        assert!(matches!(err, ScrapeError::ExtractionMiss(_)));
    }
}
