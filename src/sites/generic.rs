//! 通用小说站适配器 (Generic Site Adapter)
//!
//! 对未知站点的尽力而为路径：详情页与列表页 URL 推导，
//! 再把抽取层的级联启发式从头跑到尾。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::core::error::{Result, ScrapeError};
use crate::core::model::{ChapterBody, ChapterRef, WorkMetadata};
use crate::extract::{chapters, content, metadata};
use crate::sites::{Site, SiteContext, SiteKind};
use crate::utils::to_absolute_url;

static CHAPTERS_SUFFIX: OnceLock<Regex> = OnceLock::new();

fn chapters_suffix() -> &'static Regex {
    CHAPTERS_SUFFIX.get_or_init(|| Regex::new(r"/chapters/?(?:\?.*)?$").unwrap())
}

struct LinkSelectors {
    titled_anchor: Selector,
    chapters_anchor: Selector,
}

static LINKS: OnceLock<LinkSelectors> = OnceLock::new();

impl LinkSelectors {
    fn get() -> &'static LinkSelectors {
        LINKS.get_or_init(|| LinkSelectors {
            titled_anchor: Selector::parse("a[title][href]").unwrap(),
            chapters_anchor: Selector::parse(r#"a[href*="/chapters"]"#).unwrap(),
        })
    }
}

/// 去掉末尾的 /chapters 段得到详情页地址
pub(crate) fn derive_info_url(url: &str) -> String {
    chapters_suffix().replace(url, "").to_string()
}

pub(crate) fn url_points_at_chapters(url: &str) -> bool {
    chapters_suffix().is_match(url)
}

/// 用户给的可能是章节页：找指向真实详情页的带 title 锚点
fn find_novel_link(doc: &Html, base: &Url) -> Option<String> {
    let s = LinkSelectors::get();
    doc.select(&s.titled_anchor)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| href.contains("/novel/") || href.contains("/book/"))
        .map(|href| to_absolute_url(base, href))
}

/// 详情页上的章节目录入口
fn find_chapters_link(doc: &Html, base: &Url) -> Option<String> {
    let s = LinkSelectors::get();
    doc.select(&s.chapters_anchor)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|href| to_absolute_url(base, href))
}

pub struct GenericSite {
    ctx: SiteContext,
}

impl GenericSite {
    pub fn new(ctx: SiteContext) -> Self {
        Self { ctx }
    }

    /// 详情抓取 + 列表页 URL 推导
    ///
    /// 返回 (元数据, 列表页地址)。详情缺标题或封面时跟一跳
    /// 详情链接再试，列表地址跟着被修正。
    async fn fetch_info(&self, url: &str) -> Result<(WorkMetadata, String)> {
        let info_url = derive_info_url(url);
        let user_provided_list = url_points_at_chapters(url);
        let mut list_url = url.to_string();

        let html = self.ctx.get(&info_url).await?;
        let mut meta = match metadata::extract_metadata(&html, &info_url) {
            Ok(m) => Some(m),
            Err(ScrapeError::ExtractionMiss(_)) => None,
            Err(e) => return Err(e),
        };

        // Html 不是 Send，解析结果先收进 String 再跨 await
        let (novel_link, chapters_link) = {
            let doc = Html::parse_document(&html);
            let base = Url::parse(&info_url)
                .map_err(|e| ScrapeError::Parse(format!("无效的源地址 {info_url}: {e}")))?;
            (find_novel_link(&doc, &base), find_chapters_link(&doc, &base))
        };

        let needs_followup = meta
            .as_ref()
            .map(|m| m.cover_url.is_none())
            .unwrap_or(true);

        if needs_followup && let Some(novel_link) = novel_link {
            debug!("详情不完整，跟进真实详情页: {}", novel_link);
            let followup_html = self.ctx.get(&novel_link).await?;
            if let Ok(followup) = metadata::extract_metadata(&followup_html, &novel_link) {
                meta = Some(match meta {
                    Some(mut m) => {
                        if m.cover_url.is_none() {
                            m.cover_url = followup.cover_url;
                        }
                        if m.author.is_none() {
                            m.author = followup.author;
                        }
                        m
                    }
                    None => followup,
                });
                if !user_provided_list {
                    list_url = novel_link.clone();
                }
                let followup_chapters = {
                    let followup_doc = Html::parse_document(&followup_html);
                    Url::parse(&novel_link)
                        .ok()
                        .and_then(|base| find_chapters_link(&followup_doc, &base))
                };
                if !user_provided_list && let Some(chapters_link) = followup_chapters {
                    list_url = chapters_link;
                }
            }
        } else if !user_provided_list && let Some(chapters_link) = chapters_link {
            list_url = chapters_link;
        }

        let meta = meta.ok_or_else(|| {
            ScrapeError::ExtractionMiss(format!("无法从 {url} 解析出任何作品信息"))
        })?;

        Ok((meta, list_url))
    }
}

#[async_trait]
impl Site for GenericSite {
    fn kind(&self) -> SiteKind {
        SiteKind::Generic
    }

    async fn fetch_details(&self, url: &str) -> Result<WorkMetadata> {
        let (mut meta, list_url) = self.fetch_info(url).await?;
        let scrape = &self.ctx.config.scrape;
        meta.chapters = chapters::crawl_chapter_list(
            &self.ctx.http,
            &list_url,
            scrape.page_cap,
            scrape.chapter_delay_ms,
        )
        .await?;
        meta.source_url = url.to_string();
        info!("通用适配器抓到 {} 章: {}", meta.chapters.len(), meta.title);
        Ok(meta)
    }

    async fn fetch_chapter_list(&self, url: &str) -> Result<Vec<ChapterRef>> {
        let (_, list_url) = self.fetch_info(url).await?;
        let scrape = &self.ctx.config.scrape;
        chapters::crawl_chapter_list(
            &self.ctx.http,
            &list_url,
            scrape.page_cap,
            scrape.chapter_delay_ms,
        )
        .await
    }

    async fn fetch_chapter_content(&self, url: &str) -> Result<ChapterBody> {
        let body = content::extract_chapter_body(
            &self.ctx.http,
            url,
            self.ctx.config.scrape.min_text_len,
        )
        .await?;
        Ok(ChapterBody::Text(body))
    }
}
