//! Outbound request filtering and URL normalization

use regex::Regex;
use std::sync::LazyLock;

/// Path segment that marks a URL as an API call even if it ends like an asset
pub const API_MARKER: &str = "/api/";

/// Static asset extensions that are never reported
pub const STATIC_ASSET_EXTENSIONS: &[&str] = &[
    "js", "mjs", "css", "map", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "avif", "woff",
    "woff2", "ttf", "eot", "otf", "mp4", "webm", "mp3",
];

/// Markers of dev-server hot-reload traffic
pub const HOT_RELOAD_MARKERS: &[&str] = &[
    "__webpack_hmr",
    ".hot-update.",
    "/@vite/",
    "/@react-refresh",
    "sockjs-node",
    "livereload",
    "/_next/webpack-hmr",
];

static URL_PARTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<origin>[A-Za-z][A-Za-z0-9+.\-]*://[^/?#]*)?(?P<path>[^?#]*)").unwrap()
});

/// Split a URL into (origin, path), dropping query string and fragment
pub fn split_url(url: &str) -> (Option<&str>, &str) {
    match URL_PARTS.captures(url) {
        Some(caps) => {
            let origin = caps.name("origin").map(|m| m.as_str());
            let path = caps.name("path").map(|m| m.as_str()).unwrap_or("");
            (origin, path)
        }
        None => (None, url),
    }
}

/// URL without fragment, used to decide whether two URLs are the same document
pub fn document_url(url: &str) -> &str {
    url.split('#').next().unwrap_or(url).trim_end_matches('/')
}

/// Whether `url` points at a different document than `anchor`
pub fn diverges_from(url: &str, anchor: &str) -> bool {
    if url.starts_with("about:") {
        return false;
    }
    document_url(url) != document_url(anchor)
}

/// Normalize a request URL into the pattern used by assertions.
///
/// Query string and fragment are stripped. `/api/` URLs keep only their
/// `/api/...` path, same-origin URLs only their path, anything else keeps
/// origin and path.
pub fn normalize_pattern(url: &str, anchor: &str) -> String {
    let (origin, path) = split_url(url);
    let path = if path.is_empty() { "/" } else { path };

    if let Some(idx) = path.find(API_MARKER) {
        return path[idx..].to_string();
    }

    let (anchor_origin, _) = split_url(anchor);
    match origin {
        Some(o) if Some(o) != anchor_origin => format!("{}{}", o, path),
        _ => path.to_string(),
    }
}

/// Decides which outbound requests count as observable effects
#[derive(Debug, Clone)]
pub struct RequestFilter {
    ignored_patterns: Vec<String>,
}

impl RequestFilter {
    pub fn new(ignored_patterns: &[String]) -> Self {
        Self {
            ignored_patterns: ignored_patterns.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Whether a request should be tracked
    pub fn accepts(&self, url: &str) -> bool {
        let lower = url.to_lowercase();

        if HOT_RELOAD_MARKERS.iter().any(|m| lower.contains(m)) {
            return false;
        }
        if self.ignored_patterns.iter().any(|p| lower.contains(p.as_str())) {
            return false;
        }
        if lower.starts_with("data:") || lower.starts_with("blob:") {
            return false;
        }

        let (_, path) = split_url(&lower);
        if path.contains(API_MARKER) {
            return true;
        }
        !is_static_asset(path)
    }
}

fn is_static_asset(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rsplit_once('.') {
        Some((_, ext)) => STATIC_ASSET_EXTENSIONS.contains(&ext),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANCHOR: &str = "http://localhost:8080/index.html";

    #[test]
    fn test_query_is_stripped() {
        assert_eq!(
            normalize_pattern("http://localhost:8080/api/data?x=1", ANCHOR),
            "/api/data"
        );
        assert_eq!(
            normalize_pattern("http://localhost:8080/search?q=a#top", ANCHOR),
            "/search"
        );
    }

    #[test]
    fn test_cross_origin_keeps_origin() {
        assert_eq!(
            normalize_pattern("https://httpbin.org/get?show_env=1", ANCHOR),
            "https://httpbin.org/get"
        );
        assert_eq!(
            normalize_pattern("https://example.com/v1/api/users/7", ANCHOR),
            "/api/users/7"
        );
    }

    #[test]
    fn test_static_assets_are_discarded() {
        let filter = RequestFilter::new(&[]);
        assert!(!filter.accepts("http://localhost:8080/static/app.js"));
        assert!(!filter.accepts("http://localhost:8080/logo.PNG?v=3"));
        assert!(!filter.accepts("http://localhost:8080/main.hot-update.json"));
        assert!(filter.accepts("http://localhost:8080/api/data?x=1"));
        assert!(filter.accepts("http://localhost:8080/api/export.css"));
        assert!(filter.accepts("http://localhost:8080/graphql"));
    }

    #[test]
    fn test_ignored_patterns() {
        let filter = RequestFilter::new(&["Analytics".to_string()]);
        assert!(!filter.accepts("https://www.google-analytics.com/collect"));
        assert!(filter.accepts("http://localhost:8080/api/items"));
    }

    #[test]
    fn test_divergence_ignores_fragment() {
        assert!(!diverges_from("http://localhost:8080/index.html#tab2", ANCHOR));
        assert!(!diverges_from("about:blank", ANCHOR));
        assert!(diverges_from("http://localhost:8080/other.html", ANCHOR));
    }
}
