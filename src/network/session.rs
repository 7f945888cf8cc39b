use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::header::HeaderMap;

/// 浏览器身份会话
///
/// 保存动态注入每个请求的 UA / Referer / 附加 Header。
#[derive(Debug, Default)]
pub struct Session {
    pub ua: Arc<RwLock<String>>,
    pub referer: Arc<RwLock<Option<String>>>,
    pub extra_headers: Arc<RwLock<HeaderMap>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ua(&self, ua: String) {
        *self.ua.write() = ua;
    }

    pub fn get_ua(&self) -> String {
        self.ua.read().clone()
    }

    pub fn set_referer(&self, referer: String) {
        *self.referer.write() = Some(referer);
    }

    pub fn get_referer(&self) -> Option<String> {
        self.referer.read().clone()
    }

    pub fn get_headers(&self) -> HeaderMap {
        self.extra_headers.read().clone()
    }

    /// 清空所有会话数据
    pub fn clear(&self) {
        self.ua.write().clear();
        *self.referer.write() = None;
        self.extra_headers.write().clear();
    }
}
