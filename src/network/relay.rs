//! 中继通道定义 (Relay Endpoints)
//!
//! 一小组公开的 URL 重写中继，每个通道有自己的目标编码约定；
//! 原生执行环境下直连优先，中继仅作故障转移。

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

/// 中继通道（闭合集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relay {
    /// 直连（原生环境首选，无跨域限制）
    Direct,
    /// codetabs：`?quest=` 携带编码目标
    CodeTabs,
    /// corsproxy：`?url=` 携带编码目标
    CorsProxy,
    /// allorigins：`?url=` 携带编码目标，响应包 JSON 信封
    AllOrigins,
}

impl Relay {
    /// 原生执行环境下的候选顺序：直连优先，之后按可靠度排列
    pub fn candidates() -> &'static [Relay] {
        &[
            Relay::Direct,
            Relay::CodeTabs,
            Relay::CorsProxy,
            Relay::AllOrigins,
        ]
    }

    /// 通道标识（日志用）
    pub fn id(&self) -> &'static str {
        match self {
            Relay::Direct => "direct",
            Relay::CodeTabs => "codetabs",
            Relay::CorsProxy => "corsproxy",
            Relay::AllOrigins => "allorigins",
        }
    }

    /// 按通道约定重写目标 URL
    pub fn rewrite(&self, target: &str) -> String {
        let encoded = utf8_percent_encode(target, NON_ALPHANUMERIC);
        match self {
            Relay::Direct => target.to_string(),
            Relay::CodeTabs => {
                format!("https://api.codetabs.com/v1/proxy?quest={encoded}")
            }
            Relay::CorsProxy => format!("https://corsproxy.io/?url={encoded}"),
            Relay::AllOrigins => {
                format!("https://api.allorigins.win/get?url={encoded}")
            }
        }
    }

    /// 拆开中继响应信封，取出原始文档
    ///
    /// allorigins 把文档包在 `{"contents": "..."}` 里；其余通道原样透传。
    pub fn unwrap_body(&self, body: String) -> String {
        match self {
            Relay::AllOrigins => serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("contents")?.as_str().map(String::from))
                .unwrap_or(body),
            _ => body,
        }
    }
}
