//! 图片内容分类器 (Image Content Classifier)
//!
//! 按文件名模式区分故事页与非内容图（广告、logo、横幅）。
//! 判定表以数据形式注入，新站点的经验规则只改配置不改控制流。
//! 通过的 URL 保持文档序，绝不按文件名中的数字重排——部分源站的
//! 数字文件名与阅读顺序无关，而 DOM 顺序始终可靠。

use regex::Regex;

use crate::core::config::ImageFilterConfig;

/// 图片分类器
pub struct ImageFilter {
    blacklist: Vec<String>,
    accept_patterns: Vec<Regex>,
    strip_ext: Regex,
    strip_optimized: Regex,
}

impl ImageFilter {
    /// 从配置表构建；非法正则直接跳过而非中断启动
    pub fn new(config: &ImageFilterConfig) -> Self {
        let accept_patterns = config
            .accept_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();

        Self {
            blacklist: config.blacklist.iter().map(|s| s.to_lowercase()).collect(),
            accept_patterns,
            strip_ext: Regex::new(r"(?i)\.(jpg|jpeg|png|webp|avif|gif)$").unwrap(),
            strip_optimized: Regex::new(r"(?i)[-_]optimized").unwrap(),
        }
    }

    /// 过滤为仅含故事页的子序列（保序）
    pub fn filter_content_images(&self, urls: &[String]) -> Vec<String> {
        urls.iter()
            .filter(|u| self.is_content_image(u))
            .cloned()
            .collect()
    }

    /// 单个 URL 的判定
    pub fn is_content_image(&self, url: &str) -> bool {
        if url.is_empty() {
            return false;
        }
        // GIF 一律视为装饰/广告
        if url.to_lowercase().contains(".gif") {
            return false;
        }

        let name = self.clean_filename(url);
        if name.is_empty() {
            return false;
        }

        let lower = name.to_lowercase();
        if self.blacklist.iter().any(|b| lower.contains(b)) {
            return false;
        }

        // 复杂的不透明 ID 与广告网络/CDN 占位资源强相关，未命中任一
        // 白名单模式即拒绝
        self.accept_patterns.iter().any(|p| p.is_match(&name))
    }

    /// 去掉路径、扩展名与 `-optimized` 后缀，得到用于匹配的净文件名
    fn clean_filename(&self, url: &str) -> String {
        let filename = url
            .rsplit('/')
            .next()
            .unwrap_or("")
            .split('?')
            .next()
            .unwrap_or("");
        let without_ext = self.strip_ext.replace(filename, "");
        self.strip_optimized.replace_all(&without_ext, "").to_string()
    }
}
