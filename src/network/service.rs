//! HTTP 服务 (Transport Layer)
//!
//! 统一出口：带中继故障转移的文档获取、结构化 API 的 JSON 获取。
//! 有效性闸门在此层判定——挑战页与网络错误在控制流上同等对待，
//! 每个中继对一次逻辑获取只尝试一次。

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::core::config::AppConfig;
use crate::core::error::{Result, ScrapeError};
use crate::network::middleware::SessionMiddleware;
use crate::network::relay::Relay;
use crate::network::session::Session;

/// 结构化 API 请求使用的标识 UA
const API_USER_AGENT: &str = "bookspider/0.1";

#[derive(Clone)]
pub struct HttpService {
    client: ClientWithMiddleware,
    config: Arc<AppConfig>,
    session: Arc<Session>,
}

impl HttpService {
    pub fn new(config: Arc<AppConfig>, session: Arc<Session>) -> Result<Self> {
        session.set_ua(config.transport.user_agent.clone());

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.transport.connect_timeout_secs))
            .timeout(Duration::from_secs(config.transport.timeout_secs))
            .build()
            .map_err(ScrapeError::Network)?;

        let client = ClientBuilder::new(client).with(SessionMiddleware).build();

        Ok(Self {
            client,
            config,
            session,
        })
    }

    /// 有效性闸门：过短或命中挑战页指纹的响应体不算内容
    pub fn is_valid_document(&self, body: &str) -> bool {
        if body.len() < self.config.transport.min_body_len {
            return false;
        }
        !self
            .config
            .transport
            .challenge_markers
            .iter()
            .any(|marker| body.contains(marker))
    }

    /// 获取文档，带中继故障转移
    ///
    /// 按候选顺序逐个尝试（每个恰好一次），返回首个通过有效性闸门的文档；
    /// 全部耗尽后以 RelaysExhausted 上浮。
    pub async fn fetch_document(&self, url: &str) -> Result<String> {
        self.session.set_referer(referer_for(url));

        self.fetch_via_relays(url, |final_url| {
            let client = self.client.clone();
            let session = self.session.clone();
            async move {
                let resp = client
                    .get(&final_url)
                    .with_extension(session)
                    .send()
                    .await?;
                let resp = resp.error_for_status().map_err(ScrapeError::Network)?;
                resp.text().await.map_err(ScrapeError::Network)
            }
        })
        .await
    }

    /// 候选循环：每个中继对一次逻辑获取恰好尝试一次
    ///
    /// 可恢复错误（网络失败、挑战页）换下一个中继，其余错误立即上浮；
    /// 闸门不通过的响应体折算成 ChallengeBlocked 进入同一控制流。
    async fn fetch_via_relays<F, Fut>(&self, url: &str, mut fetch: F) -> Result<String>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut challenge_seen = false;

        for relay in Relay::candidates() {
            debug!("经 {} 获取: {}", relay.id(), url);

            let failure = match fetch(relay.rewrite(url)).await {
                Ok(body) => {
                    let body = relay.unwrap_body(body);
                    if self.is_valid_document(&body) {
                        debug!("通道 {} 命中有效文档 ({} 字节)", relay.id(), body.len());
                        return Ok(body);
                    }
                    ScrapeError::ChallengeBlocked {
                        relay: relay.id().to_string(),
                        url: url.to_string(),
                    }
                }
                Err(e) => e,
            };

            if !failure.is_transport_recoverable() {
                return Err(failure);
            }
            if matches!(failure, ScrapeError::ChallengeBlocked { .. }) {
                challenge_seen = true;
            }
            warn!("通道 {} 失败: {}", relay.id(), failure);
        }

        let hint = if challenge_seen {
            "challenge page on every relay".to_string()
        } else {
            "network failure on every relay".to_string()
        };
        Err(ScrapeError::RelaysExhausted {
            url: url.to_string(),
            hint,
        })
    }

    /// 获取结构化 API 的 JSON（直连，无中继）
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, API_USER_AGENT)
            .send()
            .await?;

        let resp = resp.error_for_status().map_err(ScrapeError::Network)?;
        let value = resp.json::<T>().await.map_err(ScrapeError::Network)?;
        Ok(value)
    }
}

/// 目标站点的 Referer 约定
///
/// kagane.org 校验同源 Referer，其余站点给通用来源即可。
fn referer_for(url: &str) -> String {
    if url.contains("kagane.org") {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| format!("{}://{}/", u.scheme(), h)))
            .unwrap_or_else(|| "https://kagane.org/".to_string())
    } else {
        "https://google.com".to_string()
    }
}
