use url::Url;

/// 解析相对链接为绝对地址
///
/// 协议相对 (`//host/...`) 继承基准协议；其余交给 Url::join。
pub fn to_absolute_url(base: &Url, href: &str) -> String {
    if href.is_empty() {
        return String::new();
    }

    if let Some(path_without_slashes) = href.strip_prefix("//") {
        return format!("{}://{}", base.scheme(), path_without_slashes);
    }

    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// 从源 URL 的路径末段提取 slug
///
/// `https://site/series/solo-leveling-a4b483cd` -> `solo-leveling-a4b483cd`。
/// 路径为空时返回 None，由调用方回退到标题派生。
pub fn slug_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .rev()
        .find(|seg| !seg.is_empty())
        .map(|seg| sanitize_slug(seg))
        .filter(|s| !s.is_empty())
}

/// 将任意标题压缩为文件系统安全的 slug
pub fn sanitize_slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.truncate(24);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// 基于源 URL 的短哈希后缀
///
/// 同一 URL 恒定派生同一后缀，重复导入会落在同一条记录上。
pub fn url_hash_suffix(url: &str) -> String {
    let hash = blake3::hash(url.as_bytes());
    hash.to_hex()[..5].to_string()
}

/// 派生稳定的作品 ID：路径 slug 优先，回退到净化标题，再附哈希后缀
pub fn derive_novel_id(source_url: &str, title: &str) -> String {
    let base = slug_from_url(source_url)
        .filter(|s| s.len() >= 3)
        .unwrap_or_else(|| sanitize_slug(title));
    let base = if base.is_empty() {
        "untitled".to_string()
    } else {
        base
    };
    format!("{}-{}", base, url_hash_suffix(source_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_relative_urls_inherit_scheme() {
        let base = Url::parse("https://example.com/novel/x").unwrap();
        assert_eq!(
            to_absolute_url(&base, "//cdn.example.com/a.jpg"),
            "https://cdn.example.com/a.jpg"
        );
    }

    #[test]
    fn root_relative_urls_get_origin() {
        let base = Url::parse("https://example.com/novel/x?page=2").unwrap();
        assert_eq!(
            to_absolute_url(&base, "/covers/a.jpg"),
            "https://example.com/covers/a.jpg"
        );
    }

    #[test]
    fn absolute_urls_pass_through() {
        let base = Url::parse("https://example.com/").unwrap();
        assert_eq!(
            to_absolute_url(&base, "http://other.com/x"),
            "http://other.com/x"
        );
    }

    #[test]
    fn slug_comes_from_last_path_segment() {
        assert_eq!(
            slug_from_url("https://asuracomic.net/series/solo-leveling-a4b483cd").as_deref(),
            Some("solo-leveling-a4b483cd")
        );
        assert_eq!(
            slug_from_url("https://example.com/novel/my-book/").as_deref(),
            Some("my-book")
        );
    }

    #[test]
    fn derive_novel_id_is_stable_per_url() {
        let a = derive_novel_id("https://example.com/novel/abc", "ABC");
        let b = derive_novel_id("https://example.com/novel/abc", "其他标题");
        assert_eq!(a, b);
        assert!(a.starts_with("abc-"));
    }

    #[test]
    fn derive_novel_id_falls_back_to_title() {
        let id = derive_novel_id("https://example.com/", "Solo Leveling!");
        assert!(id.starts_with("solo-leveling-"));
    }
}
