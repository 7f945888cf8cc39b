use std::sync::Arc;

use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

use crate::network::session::Session;

/// 会话注入中间件
///
/// 在每次请求前，动态将 Session 中的最新 UA / Referer 注入 Header。
pub struct SessionMiddleware;

#[async_trait::async_trait]
impl Middleware for SessionMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if let Some(session) = extensions.get::<Arc<Session>>() {
            let headers = req.headers_mut();

            let ua = session.get_ua();
            if !ua.is_empty()
                && let Ok(val) = reqwest::header::HeaderValue::from_str(&ua)
            {
                headers.insert(reqwest::header::USER_AGENT, val);
            }

            if let Some(referer) = session.get_referer()
                && let Ok(val) = reqwest::header::HeaderValue::from_str(&referer)
            {
                headers.insert(reqwest::header::REFERER, val);
            }

            let extra = session.get_headers();
            for (k, v) in extra.iter() {
                headers.insert(k.clone(), v.clone());
            }
        }
        next.run(req, extensions).await
    }
}
