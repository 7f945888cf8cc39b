//! 错误处理体系 (Error Handling System)
//!
//! 定义采集流水线的领域错误类型与全局 Result 别名。

use thiserror::Error;

/// 全局错误定义 (Scrape Domain Errors)
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// 响应有效但内容是反爬挑战页
    #[error("Challenge page served by {relay} for {url}")]
    ChallengeBlocked { relay: String, url: String },

    /// 所有中继通道均已尝试且失败
    #[error("All relays exhausted for {url}: {hint}")]
    RelaysExhausted { url: String, hint: String },

    /// 选择器级联与密度启发式均未命中
    #[error("Extraction miss: {0}")]
    ExtractionMiss(String),

    /// 客户端重定向链出现环路
    #[error("Redirect cycle detected at {0}")]
    RedirectCycle(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Parsing error: {0}")]
    Parse(String),

    #[error("Other error: {0}")]
    Custom(String),
}

/// 全局 Result 别名
pub type Result<T> = std::result::Result<T, ScrapeError>;

impl ScrapeError {
    /// 判定错误是否属于传输层可恢复类别
    ///
    /// 挑战页与网络错误在控制流上等价：换下一个中继继续尝试。
    pub fn is_transport_recoverable(&self) -> bool {
        matches!(
            self,
            ScrapeError::Network(_)
                | ScrapeError::Middleware(_)
                | ScrapeError::ChallengeBlocked { .. }
        )
    }

    /// 面向用户的失败原因描述
    ///
    /// 中继全部耗尽时给出可操作的提示（站点可能启用了 CDN 挑战）。
    pub fn user_hint(&self) -> String {
        match self {
            ScrapeError::RelaysExhausted { url, .. } => format!(
                "无法获取 {url}：站点可能启用了阻断程序化请求的保护，请稍后重试",
            ),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_pages_count_as_recoverable_transport_failures() {
        let blocked = ScrapeError::ChallengeBlocked {
            relay: "direct".to_string(),
            url: "https://example.com/x".to_string(),
        };
        assert!(blocked.is_transport_recoverable());

        assert!(!ScrapeError::Parse("bad".to_string()).is_transport_recoverable());
        let exhausted = ScrapeError::RelaysExhausted {
            url: "https://example.com/x".to_string(),
            hint: "challenge page on every relay".to_string(),
        };
        assert!(!exhausted.is_transport_recoverable());
    }
}
