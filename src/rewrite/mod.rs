//! URL rewriting (C10, spec §4.10): rewrites URL-bearing references in
//! captured HTML/CSS to the local paths `capture::static_capture` chose for
//! them, without ever reparsing/reserialising the document.

pub mod css;
pub mod html;

use std::collections::HashMap;

use url::Url;

pub use css::rewrite_css;
pub use html::rewrite_html;

/// Maps a captured resource's absolute URL to the local path it was saved
/// under. Lookups normalise absolute URLs, protocol-relative URLs, and
/// same-origin absolute paths to the same key so all three forms resolve.
#[derive(Debug, Clone, Default)]
pub struct UrlMap {
    by_absolute_url: HashMap<String, String>,
    origin: Option<String>,
}

impl UrlMap {
    pub fn new(origin: &Url) -> Self {
        Self { by_absolute_url: HashMap::new(), origin: Some(origin.origin().ascii_serialization()) }
    }

    pub fn insert(&mut self, absolute_url: &str, local_path: &str) {
        self.by_absolute_url.insert(absolute_url.to_string(), local_path.to_string());
    }

    /// Resolves `raw` (found in an HTML/CSS document served from `base`)
    /// against the map. Handles absolute URLs, protocol-relative URLs
    /// (`//host/path`), and same-origin absolute paths (`/path`) through the
    /// same underlying lookup, per spec §4.10.
    pub fn resolve(&self, base: &Url, raw: &str) -> Option<String> {
        if is_pass_through(raw) {
            return None;
        }
        let absolute = if let Some(rest) = raw.strip_prefix("//") {
            let scheme = base.scheme();
            format!("{scheme}://{rest}")
        } else {
            base.join(raw).ok()?.to_string()
        };
        self.by_absolute_url.get(&absolute).cloned()
    }
}

/// Schemes and fragments that must never be rewritten (spec §4.10).
pub fn is_pass_through(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("javascript:")
        || trimmed.starts_with("mailto:")
        || trimmed.starts_with("tel:")
        || trimmed.starts_with("data:")
        || trimmed.starts_with("blob:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_absolute_protocol_relative_and_same_origin_forms() {
        let base = Url::parse("https://example.com/index.html").unwrap();
        let mut map = UrlMap::new(&base);
        map.insert("https://example.com/app.js", "app.js");

        assert_eq!(map.resolve(&base, "/app.js").as_deref(), Some("app.js"));
        assert_eq!(map.resolve(&base, "https://example.com/app.js").as_deref(), Some("app.js"));
        assert_eq!(map.resolve(&base, "//example.com/app.js").as_deref(), Some("app.js"));
    }

    #[test]
    fn pass_through_schemes_never_resolve() {
        let base = Url::parse("https://example.com/").unwrap();
        let map = UrlMap::new(&base);
        for raw in ["#section", "javascript:void(0)", "mailto:a@b.com", "tel:+1", "data:text/plain,x", "blob:abc"] {
            assert_eq!(map.resolve(&base, raw), None);
        }
    }
}
