//! 配置管理系统 (Configuration Management)
//!
//! 负责 `config.toml` 的反序列化及其层级结构映射，支持默认值回退机制。
//! 挑战页指纹、图片分类表、中继清单等启发式数据全部以配置形式注入，
//! 调整站点适配行为无需改动控制流。

use std::collections::HashMap;
use std::path::Path;

use bon::Builder;
use config::{Config, File};
use serde::Deserialize;

use crate::core::error::{Result, ScrapeError};

/// 全局应用配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct AppConfig {
    /// 本地书库根目录（默认使用平台数据目录）
    #[serde(default)]
    pub library_path: Option<String>,

    /// 传输层参数
    #[serde(default)]
    pub transport: TransportConfig,

    /// 采集调度参数
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// 图片内容分类表
    #[serde(default)]
    pub images: ImageFilterConfig,

    /// 站点特定配置覆盖映射
    #[serde(default)]
    pub sites: HashMap<String, SiteConfig>,
}

/// 传输层配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct TransportConfig {
    /// 伪装浏览器 UA
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// 响应体有效性下限（字节）
    #[serde(default = "default_min_body_len")]
    pub min_body_len: usize,

    /// 挑战页指纹清单（命中即视为非内容）
    #[serde(default = "default_challenge_markers")]
    pub challenge_markers: Vec<String>,

    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// 整体超时（秒）
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// 采集调度参数
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct ScrapeConfig {
    /// 章节间礼貌延迟（毫秒）
    #[serde(default = "default_chapter_delay")]
    pub chapter_delay_ms: u64,

    /// 章节列表翻页上限
    #[serde(default = "default_page_cap")]
    pub page_cap: usize,

    /// 文本章节正文最小长度（低于该值视为提取失败）
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,

    /// 图片章节正文最小长度
    #[serde(default = "default_min_image_len")]
    pub min_image_len: usize,

    /// 结构化目录 API 的译文语言过滤
    #[serde(default = "default_language")]
    pub translated_language: String,
}

/// 图片内容分类表（模式 -> 判定，见扩展点说明）
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct ImageFilterConfig {
    /// 文件名黑名单子串（命中即拒绝）
    #[serde(default = "default_image_blacklist")]
    pub blacklist: Vec<String>,

    /// 文件名白名单正则（命中任一即接受）
    #[serde(default = "default_image_accept_patterns")]
    pub accept_patterns: Vec<String>,
}

/// 站点特定配置覆盖
#[derive(Debug, Deserialize, Builder, Clone, Default)]
pub struct SiteConfig {
    /// 自定义域名（用于镜像站点）
    pub base_url: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            min_body_len: default_min_body_len(),
            challenge_markers: default_challenge_markers(),
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            chapter_delay_ms: default_chapter_delay(),
            page_cap: default_page_cap(),
            min_text_len: default_min_text_len(),
            min_image_len: default_min_image_len(),
            translated_language: default_language(),
        }
    }
}

impl Default for ImageFilterConfig {
    fn default() -> Self {
        Self {
            blacklist: default_image_blacklist(),
            accept_patterns: default_image_accept_patterns(),
        }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Linux; Android 14; Pixel 8 Pro) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/121.0.6167.178 Mobile Safari/537.36"
        .to_string()
}

fn default_min_body_len() -> usize {
    500
}

fn default_challenge_markers() -> Vec<String> {
    [
        "cf-browser-verification",
        "Checking your browser",
        "Just a moment",
        "Enable JavaScript and cookies",
        "Attention Required",
        "Access denied",
        "403 Forbidden",
        "cf-challenge",
        "_cf_chl",
        "Verifying you are human",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_timeout() -> u64 {
    30
}
fn default_chapter_delay() -> u64 {
    500
}
fn default_page_cap() -> usize {
    50
}
fn default_min_text_len() -> usize {
    300
}
fn default_min_image_len() -> usize {
    50
}
fn default_language() -> String {
    "en".to_string()
}

fn default_image_blacklist() -> Vec<String> {
    [
        "logo", "banner", "discord", "promo", "ad-", "patreon", "credit", "recruit", "intro",
        "outro",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_image_accept_patterns() -> Vec<String> {
    [
        // 纯数字页码
        r"^\d+$",
        // 短前缀 + 数字 (page-12, img_003, p07)
        r"^(?:page|img|image|p|i)[-_]?\d+$",
        // 26 位 Crockford base32 标识（首字符 0-7）
        r"^[0-7][0-9A-HJKMNP-TV-Za-hjkmnp-tv-z]{25}$",
        // 8 位十六进制短哈希
        r"^[0-9a-fA-F]{8}$",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl AppConfig {
    /// 从文件系统中加载并解析配置
    pub fn load() -> Result<Self> {
        let config_path = Path::new("config.toml");
        let builder = Config::builder();

        let builder = if config_path.exists() {
            builder.add_source(File::from(config_path))
        } else {
            builder
        };

        let settings = builder.build().map_err(ScrapeError::Config)?;
        settings.try_deserialize().map_err(ScrapeError::Config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            transport: TransportConfig::default(),
            scrape: ScrapeConfig::default(),
            images: ImageFilterConfig::default(),
            sites: HashMap::new(),
        }
    }
}
