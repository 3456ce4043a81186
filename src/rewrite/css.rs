//! CSS `url(...)`/`@import` rewriting (spec §4.10): hand-rolled regex scan,
//! preserving quote style, resolving relative URLs against the CSS file's
//! own URL. Matches the teacher's pattern-extraction-by-regex style
//! (`parser/bundlers.rs`, `parser/filters.rs`) rather than pulling in a full
//! CSS parser for two constructs.

use regex::Regex;
use url::Url;

use crate::rewrite::UrlMap;

fn url_fn_regex() -> Regex {
    // Captures the optional quote character and the raw URL body so the
    // replacement can preserve whichever quoting (or none) the source used.
    Regex::new(r#"url\(\s*(["']?)([^"')]*)\1\s*\)"#).expect("static regex is valid")
}

fn import_regex() -> Regex {
    // `@import "x.css";` / `@import 'x.css';` / `@import url(x.css);`
    Regex::new(r#"@import\s+(?:url\(\s*(["']?)([^"')]*)\1\s*\)|(["'])([^"']*)\3)"#).expect("static regex is valid")
}

/// Rewrites every `url(...)` and `@import` reference in `css` (served from
/// `css_url`) through `map`, preserving original quoting and leaving
/// unresolvable/pass-through URLs untouched.
pub fn rewrite_css(css: &str, css_url: &Url, map: &UrlMap) -> String {
    let without_imports = rewrite_imports(css, css_url, map);
    rewrite_url_functions(&without_imports, css_url, map)
}

fn rewrite_url_functions(css: &str, css_url: &Url, map: &UrlMap) -> String {
    let re = url_fn_regex();
    let mut out = String::with_capacity(css.len());
    let mut last_end = 0;

    for caps in re.captures_iter(css) {
        let whole = caps.get(0).unwrap();
        let quote = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let raw_url = caps.get(2).map(|m| m.as_str()).unwrap_or("");

        out.push_str(&css[last_end..whole.start()]);

        match map.resolve(css_url, raw_url.trim()) {
            Some(local) => out.push_str(&format!("url({quote}{local}{quote})")),
            None => out.push_str(whole.as_str()),
        }

        last_end = whole.end();
    }
    out.push_str(&css[last_end..]);
    out
}

fn rewrite_imports(css: &str, css_url: &Url, map: &UrlMap) -> String {
    let re = import_regex();
    let mut out = String::with_capacity(css.len());
    let mut last_end = 0;

    for caps in re.captures_iter(css) {
        let whole = caps.get(0).unwrap();
        out.push_str(&css[last_end..whole.start()]);

        let (quote, raw_url, is_url_fn) = if let Some(url_match) = caps.get(2) {
            (caps.get(1).map(|m| m.as_str()).unwrap_or(""), url_match.as_str(), true)
        } else {
            (caps.get(3).map(|m| m.as_str()).unwrap_or("\""), caps.get(4).map(|m| m.as_str()).unwrap_or(""), false)
        };

        match map.resolve(css_url, raw_url.trim()) {
            Some(local) if is_url_fn => out.push_str(&format!("@import url({quote}{local}{quote})")),
            Some(local) => out.push_str(&format!("@import {quote}{local}{quote}")),
            None => out.push_str(whole.as_str()),
        }

        last_end = whole.end();
    }
    out.push_str(&css[last_end..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(origin: &Url, pairs: &[(&str, &str)]) -> UrlMap {
        let mut map = UrlMap::new(origin);
        for (url, path) in pairs {
            map.insert(url, path);
        }
        map
    }

    #[test]
    fn rewrites_quoted_and_unquoted_url_functions() {
        let base = Url::parse("https://example.com/css/app.css").unwrap();
        let map = map_with(
            &base,
            &[("https://example.com/css/bg.png", "../bg.png"), ("https://example.com/css/font.woff2", "font.woff2")],
        );
        let css = r#"a { background: url("bg.png"); } b { background: url(font.woff2); }"#;
        let rewritten = rewrite_css(css, &base, &map);
        assert!(rewritten.contains(r#"url("../bg.png")"#));
        assert!(rewritten.contains("url(font.woff2)"));
    }

    #[test]
    fn rewrites_import_statement_both_forms() {
        let base = Url::parse("https://example.com/css/app.css").unwrap();
        let map = map_with(&base, &[("https://example.com/css/base.css", "base.css")]);
        let css = r#"@import "base.css"; @import url("base.css");"#;
        let rewritten = rewrite_css(css, &base, &map);
        assert_eq!(rewritten.matches("base.css").count(), 2);
    }

    #[test]
    fn unresolvable_url_is_left_untouched() {
        let base = Url::parse("https://example.com/css/app.css").unwrap();
        let map = UrlMap::new(&base);
        let css = "a { background: url(unmapped.png); }";
        assert_eq!(rewrite_css(css, &base, &map), css);
    }
}
