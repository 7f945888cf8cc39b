//! 章节列表爬取 (Chapter List Crawler)
//!
//! 列表容器选择器级联 + 标题清洗 + 翻页跟随。
//! 输出顺序是章节跨页被发现的顺序——下游的 order_index 只信任它，
//! 从不信任标题里嵌的编号。

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::core::error::Result;
use crate::core::model::ChapterRef;
use crate::network::HttpService;
use crate::utils::to_absolute_url;

/// 列表容器候选（首个产生匹配的生效）
const LIST_ITEM_SELECTORS: &[&str] = &[
    ".chapter-list li",
    "ul.chapter-list li",
    ".list-chapter li",
    "#chapter-list li",
    ".chapters li",
    ".list-chapters li",
    "#list-chapter .row",
];

/// 翻页候选
const NEXT_PAGE_SELECTORS: &[&str] = &[
    "a[rel=\"next\"]",
    ".pagination .next a",
    ".pager .next a",
    "li.next a",
    ".nav-next a",
];

/// 文本型翻页回退扫描范围
const NEXT_TEXT_SCOPES: &[&str] = &[".pagination a", ".pager a"];

struct ListSelectors {
    items: Vec<Selector>,
    anchor: Selector,
    any_anchor: Selector,
    next: Vec<Selector>,
    next_text_scopes: Vec<Selector>,
}

static SELECTORS: OnceLock<ListSelectors> = OnceLock::new();

impl ListSelectors {
    fn get() -> &'static ListSelectors {
        SELECTORS.get_or_init(|| ListSelectors {
            items: LIST_ITEM_SELECTORS
                .iter()
                .map(|s| Selector::parse(s).unwrap())
                .collect(),
            anchor: Selector::parse("a[href]").unwrap(),
            any_anchor: Selector::parse("a[href]").unwrap(),
            next: NEXT_PAGE_SELECTORS
                .iter()
                .map(|s| Selector::parse(s).unwrap())
                .collect(),
            next_text_scopes: NEXT_TEXT_SCOPES
                .iter()
                .map(|s| Selector::parse(s).unwrap())
                .collect(),
        })
    }
}

struct TitleRules {
    relative_time: Regex,
    leading_index: Regex,
    trailing_badge: Regex,
    whitespace: Regex,
    numeric_only: Regex,
}

static RULES: OnceLock<TitleRules> = OnceLock::new();

impl TitleRules {
    fn get() -> &'static TitleRules {
        RULES.get_or_init(|| TitleRules {
            relative_time: Regex::new(
                r"(?i)\b\d+\s*(?:second|minute|hour|day|week|month|year)s?\s+ago\b",
            )
            .unwrap(),
            // 前导编号 + 可选分隔符；权威排序是发现位置，标签里的编号不可信
            leading_index: Regex::new(r"^\d+\s*(?:[-–—.:|]\s*|\s+)").unwrap(),
            trailing_badge: Regex::new(r"(?i)\s*\b(?:NEW|HOT|UP)\b\s*$").unwrap(),
            whitespace: Regex::new(r"\s+").unwrap(),
            numeric_only: Regex::new(r"^\d+$").unwrap(),
        })
    }
}

/// 清洗原始章节标题（幂等）
pub fn clean_title(raw: &str) -> String {
    let r = TitleRules::get();

    let mut s = r.whitespace.replace_all(raw.trim(), " ").to_string();
    s = r.relative_time.replace_all(&s, "").to_string();
    // 徽标与前导序号可能层叠（"12 - 13 - X"、"X NEW HOT"），剥到不动点
    loop {
        let stripped = r.trailing_badge.replace_all(&s, "");
        let stripped = r.leading_index.replace(stripped.trim(), "");
        let next = stripped.trim().to_string();
        if next == s {
            break;
        }
        s = next;
    }
    r.whitespace.replace_all(s.trim(), " ").to_string()
}

/// 有效性闸门：过短、纯数字、清洗后仍残留相对时间的标题都判为解析失误
pub fn is_valid_title(cleaned: &str) -> bool {
    let r = TitleRules::get();
    cleaned.chars().count() >= 5
        && !r.numeric_only.is_match(cleaned)
        && !r.relative_time.is_match(cleaned)
}

fn normalize_for_dedup(s: &str) -> String {
    TitleRules::get()
        .whitespace
        .replace_all(s.trim(), " ")
        .to_lowercase()
}

/// 单页解析结果
pub struct PageRefs {
    pub chapters: Vec<ChapterRef>,
    pub next_url: Option<String>,
    /// 本页原始匹配数（清洗前，用于判断是否还有内容）
    pub raw_count: usize,
}

/// 解析单个列表页
pub fn extract_page_refs(html: &str, page_url: &str) -> PageRefs {
    let doc = Html::parse_document(html);
    let s = ListSelectors::get();
    let base = Url::parse(page_url).ok();

    let mut raw: Vec<(String, String)> = Vec::new();

    // 1. 容器级联：只取每个列表项里的第一个锚点，避免吞掉角标文本
    for item_sel in &s.items {
        for item in doc.select(item_sel) {
            let Some(link) = item.select(&s.anchor).next() else {
                continue;
            };
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let text = link.text().collect::<String>();
            raw.push((text, href.to_string()));
        }
        if !raw.is_empty() {
            break;
        }
    }

    // 2. 回退：扫描所有 href 含章节指示子串的锚点
    if raw.is_empty() {
        for link in doc.select(&s.any_anchor) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let text = link.text().collect::<String>();
            let text_lower = text.to_lowercase();
            let href_lower = href.to_lowercase();
            let indicates_chapter = href_lower.contains("chapter")
                || href_lower.contains("ch-")
                || text_lower.contains("chapter")
                || text_lower.contains("episode");
            if indicates_chapter
                && href.len() > 5
                && !href.starts_with("javascript")
                && !href.starts_with('#')
            {
                raw.push((text, href.to_string()));
            }
        }
    }

    let raw_count = raw.len();
    let mut chapters = Vec::with_capacity(raw.len());
    for (text, href) in raw {
        let title = clean_title(&text);
        if !is_valid_title(&title) {
            continue;
        }
        let url = match &base {
            Some(b) => to_absolute_url(b, &href),
            None => href,
        };
        if url.is_empty() {
            continue;
        }
        chapters.push(ChapterRef::new(title, url));
    }

    PageRefs {
        chapters,
        next_url: find_next_page(&doc, page_url),
        raw_count,
    }
}

fn find_next_page(doc: &Html, page_url: &str) -> Option<String> {
    let s = ListSelectors::get();
    let base = Url::parse(page_url).ok()?;

    let mut next_href: Option<String> = None;
    for sel in &s.next {
        if let Some(el) = doc.select(sel).next()
            && let Some(href) = el.value().attr("href")
            && !href.is_empty()
            && !href.starts_with('#')
        {
            next_href = Some(href.to_string());
            break;
        }
    }

    // 文本回退："Next" / "»"
    if next_href.is_none() {
        'outer: for scope in &s.next_text_scopes {
            for el in doc.select(scope) {
                let text = el.text().collect::<String>();
                if text.contains("Next") || text.contains('»') {
                    if let Some(href) = el.value().attr("href")
                        && !href.is_empty()
                        && !href.starts_with('#')
                    {
                        next_href = Some(href.to_string());
                        break 'outer;
                    }
                }
            }
        }
    }

    next_href.map(|h| to_absolute_url(&base, &h))
}

/// 跨页爬取完整章节列表
///
/// 访问集 + 翻页硬上限防御自引用 "next" 链接；
/// 链接与标题的双重去重容忍同章双锚点的站点。
pub async fn crawl_chapter_list(
    http: &HttpService,
    start_url: &str,
    page_cap: usize,
    page_delay_ms: u64,
) -> Result<Vec<ChapterRef>> {
    let mut seen_pages: indexmap::IndexSet<String> = indexmap::IndexSet::new();
    let mut by_link: IndexMap<String, ChapterRef> = IndexMap::new();
    let mut seen_titles: std::collections::HashSet<String> = std::collections::HashSet::new();

    let mut current = start_url.to_string();
    let mut page_count = 0usize;

    while !current.is_empty() && !seen_pages.contains(&current) && page_count < page_cap {
        seen_pages.insert(current.clone());
        page_count += 1;
        debug!("抓取列表页 {}: {}", page_count, current);

        let html = match http.fetch_document(&current).await {
            Ok(h) => h,
            Err(e) => {
                // 首页失败是终态；后续页失败保留已发现的部分
                if page_count == 1 {
                    return Err(e);
                }
                warn!("列表页 {} 获取失败，保留已发现章节: {}", current, e);
                break;
            }
        };

        let page = extract_page_refs(&html, &current);

        for ch in page.chapters {
            let link_key = normalize_for_dedup(&ch.url);
            let title_key = normalize_for_dedup(&ch.title);
            if by_link.contains_key(&link_key) || seen_titles.contains(&title_key) {
                continue;
            }
            seen_titles.insert(title_key);
            by_link.insert(link_key, ch);
        }

        if page.raw_count == 0 {
            break;
        }

        match page.next_url {
            Some(next) if !seen_pages.contains(&next) => {
                current = next;
                tokio::time::sleep(std::time::Duration::from_millis(page_delay_ms)).await;
            }
            _ => break,
        }
    }

    Ok(by_link.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_index_and_separator_are_stripped() {
        assert_eq!(clean_title("12 - Chapter Twelve"), "Chapter Twelve");
        assert_eq!(clean_title("12 Chapter Twelve"), "Chapter Twelve");
        assert_eq!(clean_title("3. The Awakening"), "The Awakening");
        assert_eq!(clean_title("7: Return"), "Return");
    }

    #[test]
    fn relative_time_suffixes_are_stripped() {
        assert_eq!(clean_title("Chapter 10 3 hours ago"), "Chapter 10");
        assert_eq!(clean_title("Chapter 10 2 days ago"), "Chapter 10");
    }

    #[test]
    fn trailing_badges_are_stripped() {
        assert_eq!(clean_title("Chapter 5 NEW"), "Chapter 5");
        assert_eq!(clean_title("Chapter 5 HOT"), "Chapter 5");
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(clean_title("  Chapter   One\n\t "), "Chapter One");
    }

    #[test]
    fn cleaning_is_idempotent() {
        for raw in [
            "12 - Chapter Twelve",
            "Chapter 10 3 hours ago NEW",
            "  普通   章节  ",
            "7: Return HOT",
            // 层叠前缀/徽标也须一次清洗到位
            "12 - 13 - Chapter X",
            "Chapter 5 NEW HOT",
            "1. 2. Double Numbered",
        ] {
            let once = clean_title(raw);
            assert_eq!(clean_title(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn stacked_prefixes_strip_in_one_pass() {
        assert_eq!(clean_title("12 - 13 - Chapter X"), "Chapter X");
        assert_eq!(clean_title("Chapter 5 NEW HOT"), "Chapter 5");
    }

    #[test]
    fn validity_gate_boundaries() {
        assert!(!is_valid_title("12"));
        assert!(!is_valid_title(&clean_title("3 hours ago")));
        assert!(is_valid_title("Chapter Twelve"));
        assert!(is_valid_title(&clean_title("12 Chapter Twelve")));
        assert!(!is_valid_title("abcd"));
    }

    #[test]
    fn first_anchor_in_item_wins_over_badge_anchors() {
        let html = r#"
            <ul class="chapter-list">
              <li><a href="/novel/x/ch-1">Chapter One</a><a href="/badge">NEW</a></li>
              <li><a href="/novel/x/ch-2">Chapter Two</a></li>
            </ul>
        "#;
        let page = extract_page_refs(html, "https://example.com/novel/x");
        let titles: Vec<_> = page.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Chapter One", "Chapter Two"]);
        assert_eq!(page.chapters[0].url, "https://example.com/novel/x/ch-1");
    }

    #[test]
    fn anchor_scan_fallback_finds_chapter_links() {
        let html = r#"
            <div>
              <a href="/read/ch-102">Chapter 102 Arrival</a>
              <a href="javascript:void(0)">Chapter Nope</a>
              <a href="/about">About us</a>
            </div>
        "#;
        let page = extract_page_refs(html, "https://example.com/series/y");
        assert_eq!(page.chapters.len(), 1);
        assert_eq!(page.chapters[0].title, "Chapter 102 Arrival");
    }

    #[test]
    fn invalid_titles_are_silently_dropped() {
        let html = r#"
            <ul class="chapter-list">
              <li><a href="/ch-1">12</a></li>
              <li><a href="/ch-2">3 hours ago</a></li>
              <li><a href="/ch-3">Chapter Three</a></li>
            </ul>
        "#;
        let page = extract_page_refs(html, "https://example.com/n");
        assert_eq!(page.chapters.len(), 1);
        assert_eq!(page.chapters[0].title, "Chapter Three");
        assert_eq!(page.raw_count, 3);
    }

    #[test]
    fn rel_next_is_resolved_against_the_page() {
        let html = r#"
            <ul class="chapter-list"><li><a href="/ch-1">Chapter One</a></li></ul>
            <a rel="next" href="?page=2">下一页</a>
        "#;
        let page = extract_page_refs(html, "https://example.com/novel/x/chapters");
        assert_eq!(
            page.next_url.as_deref(),
            Some("https://example.com/novel/x/chapters?page=2")
        );
    }

    #[test]
    fn pagination_text_fallback_matches_next() {
        let html = r#"
            <ul class="chapter-list"><li><a href="/ch-1">Chapter One</a></li></ul>
            <div class="pagination"><a href="/p/1">1</a><a href="/p/2">Next »</a></div>
        "#;
        let page = extract_page_refs(html, "https://example.com/n");
        assert_eq!(page.next_url.as_deref(), Some("https://example.com/p/2"));
    }
}
