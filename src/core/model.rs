//! 领域模型 (Domain Model)
//!
//! 远端目录条目的暂存快照与本地书库的持久化记录。

use serde::{Deserialize, Serialize};
use strum::Display;

/// 作品类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum Category {
    Novel,
    Manhwa,
}

/// 章节引用
///
/// 发现阶段的最小章节指针。`url` 是章节在源站的唯一标识，
/// 也是与已导入章节去重的键（标题可能重复或漂移，不可靠）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl ChapterRef {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            date: None,
        }
    }
}

/// 作品元数据快照
///
/// 适配器产出的远端目录条目，抓取时刻的不可变快照。
/// 本身不落库：先暂存供用户确认，再由编排器转换为 Novel + Chapter 记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkMetadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub category: Category,
    #[serde(default)]
    pub chapters: Vec<ChapterRef>,
    /// 同一条目的多个汉化组/发布方（目录 B 类适配器填充）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publishers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_publisher: Option<String>,
    pub source_url: String,
    pub source_id: String,
}

impl WorkMetadata {
    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }
}

/// 章节正文
///
/// 文本站返回清洗后的 HTML 片段；图片站返回保持文档序的图片地址清单。
#[derive(Debug, Clone)]
pub enum ChapterBody {
    Text(String),
    Images(Vec<String>),
}

impl ChapterBody {
    /// 转换为持久化内容
    pub fn render(&self) -> String {
        match self {
            ChapterBody::Text(html) => html.clone(),
            ChapterBody::Images(urls) => urls
                .iter()
                .map(|u| format!(r#"<img src="{u}" loading="lazy" />"#))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// 正文有效长度（图片章节以标签拼接后的长度计）
    pub fn len(&self) -> usize {
        match self {
            ChapterBody::Text(html) => html.len(),
            ChapterBody::Images(urls) => {
                if urls.is_empty() {
                    0
                } else {
                    self.render().len()
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 持久化作品记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovelRecord {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub category: Category,
    pub source_url: String,
    /// 上次抓取时远端目录的章节总数（缓存新鲜度判据）
    #[serde(default)]
    pub total_chapters: usize,
    /// 上次抓取的 Unix 时间戳（秒）
    #[serde(default)]
    pub last_fetched_at: u64,
}

/// 持久化章节记录
///
/// `order_index` 是权威排序，由“既有偏移 + 循环位置”赋值，
/// 绝不从标题中解析章节号推导。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub id: String,
    pub novel_id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub order_index: usize,
    pub source_url: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl ChapterRecord {
    /// 确定性章节 ID：`{novel_id}-ch-{order_index}`
    pub fn make_id(novel_id: &str, order_index: usize) -> String {
        format!("{novel_id}-ch-{order_index}")
    }
}

/// 完成/失败通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// 固定为 "scrape"
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub novel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl Notification {
    pub fn scrape(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            kind: "scrape".to_string(),
            novel_id: None,
            category: None,
        }
    }

    pub fn with_payload(mut self, novel_id: impl Into<String>, category: Category) -> Self {
        self.novel_id = Some(novel_id.into());
        self.category = Some(category);
        self
    }
}
