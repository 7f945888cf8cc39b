//! 正文抽取 (Content Extraction)
//!
//! 三段式：客户端重定向解析 -> 容器级联/密度回退 -> 语义增强。
//! 聚合站常用 meta-refresh 或脚本跳转把读者甩到真实章节页，
//! 抽取必须先追到终点再动手。

use std::collections::HashSet;
use std::future::Future;
use std::sync::OnceLock;

use lol_html::html_content::ContentType;
use lol_html::{RewriteStrSettings, doc_text, element, rewrite_str};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::core::error::{Result, ScrapeError};
use crate::extract::images::ImageFilter;
use crate::network::HttpService;
use crate::utils::to_absolute_url;

/// 容器级联的最低文本量，低于此值换下一个候选
const CASCADE_MIN_LEN: usize = 200;
/// 密度回退的最低文本量
const DENSITY_MIN_LEN: usize = 1000;
/// 客户端重定向的最大跳数
const MAX_REDIRECT_HOPS: usize = 5;

const CONTENT_SELECTORS: &[&str] = &[
    "#chapter-content",
    ".chapter-content",
    "#chr-content",
    ".read-content",
    ".reading-content",
    ".text-left",
    "#content",
    ".entry-content",
];

const IMAGE_SELECTORS: &[&str] = &[
    "#readerarea img",
    ".reading-content img",
    ".vung-doc img",
    ".container-chapter-reader img",
    ".chapter-content img",
    ".entry-content img",
    ".text-left img",
    "article img",
];

/// 懒加载属性优先，src 是最后的兜底
const IMAGE_SRC_ATTRS: &[&str] = &["data-src", "data-lazy-src", "data-cfsrc", "src"];

/// 选中容器后仍要剔除的垃圾节点
const JUNK_SELECTORS: &[&str] = &[
    "script",
    "style",
    "iframe",
    "noscript",
    ".ads",
    ".ad-container",
    ".hidden",
    ".announcement",
];

struct ContentSelectors {
    content: Vec<Selector>,
    images: Vec<Selector>,
    density: Selector,
    br: Selector,
    meta_refresh: Selector,
    script: Selector,
}

static SELECTORS: OnceLock<ContentSelectors> = OnceLock::new();

impl ContentSelectors {
    fn get() -> &'static ContentSelectors {
        SELECTORS.get_or_init(|| ContentSelectors {
            content: CONTENT_SELECTORS
                .iter()
                .map(|s| Selector::parse(s).unwrap())
                .collect(),
            images: IMAGE_SELECTORS
                .iter()
                .map(|s| Selector::parse(s).unwrap())
                .collect(),
            density: Selector::parse("div, section, main").unwrap(),
            br: Selector::parse("br").unwrap(),
            meta_refresh: Selector::parse("meta[http-equiv]").unwrap(),
            script: Selector::parse("script").unwrap(),
        })
    }
}

struct RedirectRules {
    meta_url: Regex,
    location_assign: Regex,
    location_replace: Regex,
}

static REDIRECTS: OnceLock<RedirectRules> = OnceLock::new();

impl RedirectRules {
    fn get() -> &'static RedirectRules {
        REDIRECTS.get_or_init(|| RedirectRules {
            meta_url: Regex::new(r#"(?i)url\s*=\s*['"]?([^'">\s]+)"#).unwrap(),
            location_assign: Regex::new(
                r#"(?:window\.)?location(?:\.href)?\s*=\s*["']([^"']+)["']"#,
            )
            .unwrap(),
            location_replace: Regex::new(r#"location\.replace\(\s*["']([^"']+)["']"#).unwrap(),
        })
    }
}

/// 在页面里探测客户端重定向目标
///
/// meta-refresh 优先于脚本跳转；返回解析为绝对地址的目标。
pub fn find_client_redirect(html: &str, page_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let s = ContentSelectors::get();
    let r = RedirectRules::get();
    let base = Url::parse(page_url).ok()?;

    for meta in doc.select(&s.meta_refresh) {
        if meta
            .value()
            .attr("http-equiv")
            .is_some_and(|v| v.eq_ignore_ascii_case("refresh"))
            && let Some(content) = meta.value().attr("content")
            && let Some(caps) = r.meta_url.captures(content)
        {
            return Some(to_absolute_url(&base, &caps[1]));
        }
    }

    for script in doc.select(&s.script) {
        let code = script.text().collect::<String>();
        for re in [&r.location_assign, &r.location_replace] {
            if let Some(caps) = re.captures(&code) {
                return Some(to_absolute_url(&base, &caps[1]));
            }
        }
    }

    None
}

/// 沿客户端重定向链追到终点，返回 (最终 HTML, 最终 URL)
///
/// 访问集 + 跳数上限；重访即成环，立即报错而不是空转。
pub(crate) async fn resolve_with<F, Fut>(mut fetch: F, url: &str) -> Result<(String, String)>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut visited: HashSet<String> = HashSet::new();
    let mut current = url.to_string();

    for _ in 0..=MAX_REDIRECT_HOPS {
        if !visited.insert(current.clone()) {
            return Err(ScrapeError::RedirectCycle(current));
        }
        let html = fetch(current.clone()).await?;
        match find_client_redirect(&html, &current) {
            Some(next) => {
                debug!("客户端重定向: {} -> {}", current, next);
                current = next;
            }
            None => return Ok((html, current)),
        }
    }

    Err(ScrapeError::RedirectCycle(current))
}

pub async fn resolve_redirects(http: &HttpService, url: &str) -> Result<(String, String)> {
    resolve_with(|u| async move { http.fetch_document(&u).await }, url).await
}

fn strip_junk(html: &str) -> String {
    let handlers = JUNK_SELECTORS
        .iter()
        .map(|sel| {
            element!(*sel, |el| {
                el.remove();
                Ok(())
            })
        })
        .collect();

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::default()
        },
    )
    .unwrap_or_else(|_| html.to_string())
}

fn visible_text_len(fragment: &str) -> usize {
    let doc = Html::parse_fragment(fragment);
    doc.root_element().text().collect::<String>().trim().chars().count()
}

fn density_fallback(doc: &Html) -> Option<String> {
    let s = ContentSelectors::get();
    let mut best: Option<(usize, String)> = None;

    for el in doc.select(&s.density) {
        let len = el.text().collect::<String>().trim().chars().count();
        if len <= DENSITY_MIN_LEN {
            continue;
        }
        let p_children = el
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|c| c.value().name() == "p")
            .count();
        let br_count = el.select(&s.br).count();
        if (p_children > 3 || br_count > 5)
            && best.as_ref().is_none_or(|(best_len, _)| len > *best_len)
        {
            best = Some((len, el.inner_html()));
        }
    }

    best.map(|(_, html)| html)
}

/// 从章节页 HTML 抽取正文片段并增强
///
/// 级联收第一个文本量过阈的容器；全部落空时走密度回退，
/// 在模板骨架里找最大的稠密文本块。最终文本量不足按失败处理。
pub fn extract_body_html(html: &str, min_text_len: usize) -> Result<String> {
    let cleaned = strip_junk(html);
    let doc = Html::parse_document(&cleaned);
    let s = ContentSelectors::get();

    let mut body: Option<String> = None;
    for sel in &s.content {
        if let Some(el) = doc.select(sel).next() {
            let len = el.text().collect::<String>().trim().chars().count();
            if len > CASCADE_MIN_LEN {
                body = Some(el.inner_html());
                break;
            }
        }
    }
    if body.is_none() {
        body = density_fallback(&doc);
    }

    let body = body.ok_or_else(|| {
        ScrapeError::ExtractionMiss("章节页没有命中任何正文容器".to_string())
    })?;

    if visible_text_len(&body) < min_text_len {
        return Err(ScrapeError::ExtractionMiss(
            "正文过短，疑似占位页或解析失误".to_string(),
        ));
    }

    Ok(enhance_content(&body))
}

struct SpanRules {
    system: Regex,
    note: Regex,
    thought: Regex,
    sfx: Regex,
}

static SPANS: OnceLock<SpanRules> = OnceLock::new();

impl SpanRules {
    fn get() -> &'static SpanRules {
        SPANS.get_or_init(|| SpanRules {
            system: Regex::new(r"\[[^\]]+\]").unwrap(),
            note: Regex::new(r"\([^)]+\)").unwrap(),
            thought: Regex::new(r"(^|[\s>])'([^']{2,}?)'([\s<.,;:?!]|$)").unwrap(),
            sfx: Regex::new(r"(^|[\s>])\*([^*]+)\*([\s<.,;:?!]|$)").unwrap(),
        })
    }
}

fn tag_spans(text: &str) -> String {
    let r = SpanRules::get();
    let t = r
        .system
        .replace_all(text, r#"<span class="smart-system">$0</span>"#);
    let t = r
        .note
        .replace_all(&t, r#"<span class="smart-note">$0</span>"#);
    let t = r
        .thought
        .replace_all(&t, r#"$1<span class="smart-thought">'$2'</span>$3"#);
    r.sfx
        .replace_all(&t, r#"$1<span class="smart-sfx">*$2*</span>$3"#)
        .to_string()
}

/// 语义增强：只改写文本节点，标签结构原样保留
///
/// 方括号=系统消息，圆括号=旁注，引号短句=心声，星号=拟声。
pub fn enhance_content(html: &str) -> String {
    let mut buffer = String::new();
    rewrite_str(
        html,
        RewriteStrSettings {
            document_content_handlers: vec![doc_text!(move |t| {
                buffer.push_str(t.as_str());
                if t.last_in_text_node() {
                    t.replace(&tag_spans(&buffer), ContentType::Html);
                    buffer.clear();
                } else {
                    t.remove();
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .unwrap_or_else(|_| html.to_string())
}

/// 图片章节的原始图源清单（文档序，懒加载属性优先）
pub fn extract_image_srcs(html: &str, page_url: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let s = ContentSelectors::get();
    let base = Url::parse(page_url).ok();

    for sel in &s.images {
        let srcs: Vec<String> = doc
            .select(sel)
            .filter_map(|img| {
                IMAGE_SRC_ATTRS
                    .iter()
                    .find_map(|attr| img.value().attr(attr))
                    .map(str::trim)
                    .filter(|src| !src.is_empty())
                    .map(|src| match &base {
                        Some(b) => to_absolute_url(b, src),
                        None => src.to_string(),
                    })
            })
            .collect();
        if !srcs.is_empty() {
            return srcs;
        }
    }

    Vec::new()
}

/// 文本章节：重定向 -> 抽取 -> 增强
pub async fn extract_chapter_body(
    http: &HttpService,
    url: &str,
    min_text_len: usize,
) -> Result<String> {
    let (html, final_url) = resolve_redirects(http, url).await?;
    if final_url != url {
        debug!("章节页重定向终点: {}", final_url);
    }
    extract_body_html(&html, min_text_len)
}

/// 图片章节：重定向 -> 图源级联 -> 分类器过滤
pub async fn extract_image_chapter(
    http: &HttpService,
    url: &str,
    filter: &ImageFilter,
) -> Result<Vec<String>> {
    let (html, final_url) = resolve_redirects(http, url).await?;
    Ok(filter.filter_content_images(&extract_image_srcs(&html, &final_url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn meta_refresh_target_is_resolved() {
        let html = r#"<meta http-equiv="refresh" content="0; url=/read/ch-1">"#;
        assert_eq!(
            find_client_redirect(html, "https://example.com/go"),
            Some("https://example.com/read/ch-1".to_string())
        );
    }

    #[test]
    fn script_location_assignment_is_detected() {
        let html = r#"<script>window.location.href = "https://mirror.example.com/ch-1";</script>"#;
        assert_eq!(
            find_client_redirect(html, "https://example.com/go"),
            Some("https://mirror.example.com/ch-1".to_string())
        );
    }

    #[test]
    fn script_location_replace_is_detected() {
        let html = r#"<script>location.replace('/reader/201');</script>"#;
        assert_eq!(
            find_client_redirect(html, "https://example.com/go"),
            Some("https://example.com/reader/201".to_string())
        );
    }

    #[test]
    fn plain_pages_yield_no_redirect() {
        let html = r#"<div class="chapter-content"><p>正文</p></div>"#;
        assert_eq!(find_client_redirect(html, "https://example.com/ch-1"), None);
    }

    #[tokio::test]
    async fn redirect_cycles_are_rejected() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://example.com/a".to_string(),
            r#"<meta http-equiv="refresh" content="0;url=https://example.com/b">"#.to_string(),
        );
        pages.insert(
            "https://example.com/b".to_string(),
            r#"<meta http-equiv="refresh" content="0;url=https://example.com/a">"#.to_string(),
        );
        let pages = Arc::new(pages);

        let err = resolve_with(
            move |u| {
                let pages = pages.clone();
                async move { Ok(pages.get(&u).cloned().unwrap_or_default()) }
            },
            "https://example.com/a",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ScrapeError::RedirectCycle(_)));
    }

    #[tokio::test]
    async fn redirect_chain_ends_at_real_page() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://example.com/a".to_string(),
            r#"<meta http-equiv="refresh" content="0;url=https://example.com/b">"#.to_string(),
        );
        pages.insert(
            "https://example.com/b".to_string(),
            r#"<div class="chapter-content"><p>到站了</p></div>"#.to_string(),
        );
        let pages = Arc::new(pages);

        let (html, final_url) = resolve_with(
            move |u| {
                let pages = pages.clone();
                async move { Ok(pages.get(&u).cloned().unwrap_or_default()) }
            },
            "https://example.com/a",
        )
        .await
        .unwrap();

        assert_eq!(final_url, "https://example.com/b");
        assert!(html.contains("到站了"));
    }

    fn long_paragraphs(n: usize) -> String {
        (0..n)
            .map(|i| format!("<p>第 {i} 段，这里是足够长的正文内容，模拟真实章节的句子密度与长度。</p>"))
            .collect()
    }

    #[test]
    fn cascade_picks_first_sufficient_container() {
        let html = format!(
            r#"<div class="chapter-content">{}</div><div class="entry-content">{}</div>"#,
            long_paragraphs(20),
            long_paragraphs(20)
        );
        let body = extract_body_html(&html, 300).unwrap();
        assert!(body.contains("第 0 段"));
    }

    #[test]
    fn junk_nodes_are_stripped_from_the_body() {
        let html = format!(
            r#"<div class="chapter-content"><script>evil()</script><div class="ads">广告</div>{}</div>"#,
            long_paragraphs(20)
        );
        let body = extract_body_html(&html, 300).unwrap();
        assert!(!body.contains("evil"));
        assert!(!body.contains("广告"));
    }

    #[test]
    fn density_fallback_finds_unlabelled_body() {
        let html = format!(
            r#"<div class="site-chrome">导航</div><section id="x">{}</section>"#,
            long_paragraphs(40)
        );
        let body = extract_body_html(&html, 300).unwrap();
        assert!(body.contains("第 39 段"));
    }

    #[test]
    fn short_results_are_an_extraction_miss() {
        let html = r#"<div class="chapter-content"><p>太短</p></div>"#;
        let err = extract_body_html(html, 300).unwrap_err();
        assert!(matches!(err, ScrapeError::ExtractionMiss(_)));
    }

    #[test]
    fn enhancement_wraps_semantic_runs() {
        let out = enhance_content("<p>[System] Ding! (note) *Boom* 结束</p>");
        assert!(out.contains(r#"<span class="smart-system">[System]</span>"#));
        assert!(out.contains(r#"<span class="smart-note">(note)</span>"#));
        assert!(out.contains(r#"<span class="smart-sfx">*Boom*</span>"#));
    }

    #[test]
    fn enhancement_tags_inner_thought() {
        let out = enhance_content("<p>He paused. 'I should go' and left.</p>");
        assert!(out.contains(r#"<span class="smart-thought">'I should go'</span>"#));
    }

    #[test]
    fn enhancement_leaves_contractions_alone() {
        let out = enhance_content("<p>don't touch that</p>");
        assert!(!out.contains("smart-thought"));
    }

    #[test]
    fn enhancement_never_rewrites_tags() {
        let out = enhance_content(r#"<p class="x">plain text</p>"#);
        assert!(out.contains(r#"<p class="x">"#));
    }

    #[test]
    fn image_srcs_prefer_lazy_attributes_in_document_order() {
        let html = r#"
            <div id="readerarea">
              <img src="data:image/gif;base64,AAA" data-src="https://cdn.example.com/001.jpg">
              <img src="https://cdn.example.com/002.jpg">
            </div>
        "#;
        let srcs = extract_image_srcs(html, "https://example.com/ch-1");
        assert_eq!(
            srcs,
            vec![
                "https://cdn.example.com/001.jpg".to_string(),
                "https://cdn.example.com/002.jpg".to_string()
            ]
        );
    }
}
