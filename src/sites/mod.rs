//! 站点适配器 (Source Adapters)
//!
//! 封闭的适配器集合：两个结构化 JSON 目录 API、两种社区站 HTML 形态、
//! 一条通用兜底线。按 URL 形态做纯函数分发，优先级固定，兜底永远在最后。

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use strum::Display;

use crate::core::config::AppConfig;
use crate::core::error::{Result, ScrapeError};
use crate::core::model::{Category, ChapterBody, ChapterRef, WorkMetadata};
use crate::extract::ImageFilter;
use crate::network::HttpService;

pub mod asura;
pub mod comick;
pub mod generic;
pub mod kagane;
pub mod mangadex;

/// 站点形态标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SiteKind {
    MangaDex,
    Comick,
    Asura,
    Kagane,
    Generic,
}

impl SiteKind {
    /// URL 形态分发，按固定优先级匹配，不认识的一律走通用线
    pub fn detect(url: &str) -> SiteKind {
        let lower = url.to_lowercase();
        if lower.contains("mangadex.org") {
            SiteKind::MangaDex
        } else if lower.contains("comick.io")
            || lower.contains("comick.fun")
            || lower.contains("comick.app")
        {
            SiteKind::Comick
        } else if lower.contains("asuracomic.net") || lower.contains("asurascans.com") {
            SiteKind::Asura
        } else if lower.contains("kagane.org") {
            SiteKind::Kagane
        } else {
            SiteKind::Generic
        }
    }

    /// 该形态的章节正文是否以图片为主
    pub fn is_image_source(&self) -> bool {
        !matches!(self, SiteKind::Generic)
    }

    pub fn default_category(&self) -> Category {
        if self.is_image_source() {
            Category::Manhwa
        } else {
            Category::Novel
        }
    }
}

/// 站点执行上下文
///
/// 适配器共享的依赖集合：配置、传输层与图片分类器。
#[derive(Clone)]
pub struct SiteContext {
    pub config: Arc<AppConfig>,
    pub http: Arc<HttpService>,
    pub images: Arc<ImageFilter>,
}

impl SiteContext {
    pub fn new(config: Arc<AppConfig>, http: Arc<HttpService>) -> Self {
        let images = Arc::new(ImageFilter::new(&config.images));
        Self {
            config,
            http,
            images,
        }
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        self.http.fetch_document(url).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.http.fetch_json(url).await
    }
}

/// 站点能力集
///
/// 搜索是可选能力；目录抓取与正文抓取是每个适配器的义务。
#[async_trait]
pub trait Site: Send + Sync {
    fn kind(&self) -> SiteKind;

    async fn search(&self, _query: &str) -> Result<Vec<WorkMetadata>> {
        Err(ScrapeError::Custom(format!(
            "{} 源不支持站内搜索",
            self.kind()
        )))
    }

    /// 获取作品详情（含完整章节列表）
    async fn fetch_details(&self, url: &str) -> Result<WorkMetadata>;

    /// 只刷新章节列表（增量同步用）
    async fn fetch_chapter_list(&self, url: &str) -> Result<Vec<ChapterRef>>;

    /// 按发布方过滤的章节列表，默认退化为全量列表
    async fn fetch_chapter_list_for_publisher(
        &self,
        url: &str,
        _publisher: &str,
    ) -> Result<Vec<ChapterRef>> {
        self.fetch_chapter_list(url).await
    }

    /// 获取单章正文
    async fn fetch_chapter_content(&self, url: &str) -> Result<ChapterBody>;
}

/// 按 URL 形态实例化适配器
pub fn site_for(url: &str, ctx: SiteContext) -> Box<dyn Site> {
    match SiteKind::detect(url) {
        SiteKind::MangaDex => Box::new(mangadex::MangaDexSite::new(ctx)),
        SiteKind::Comick => Box::new(comick::ComickSite::new(ctx)),
        SiteKind::Asura => Box::new(asura::AsuraSite::new(ctx)),
        SiteKind::Kagane => Box::new(kagane::KaganeSite::new(ctx)),
        SiteKind::Generic => Box::new(generic::GenericSite::new(ctx)),
    }
}
