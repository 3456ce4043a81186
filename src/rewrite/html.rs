//! HTML rewriting via `lol_html`'s streaming element rewriter (spec §4.10):
//! URL-bearing attributes, `srcset`/`imagesrcset`, `style` attribute
//! `url(...)`, inline `<style>` bodies, and whitelisted meta tags. Never
//! reparses/reserialises the document — `lol_html` patches attributes and
//! text chunks in the original byte stream instead of rebuilding the tree.

use std::cell::RefCell;
use std::rc::Rc;

use lol_html::html_content::ContentType;
use lol_html::{element, text, HtmlRewriter, Settings};
use url::Url;

use crate::error::{ReconError, Result};
use crate::rewrite::css::rewrite_css;
use crate::rewrite::UrlMap;

/// Attributes that may carry a single resource URL (spec §4.10); `data-*`
/// variants are handled separately since CSS selectors can't wildcard on
/// attribute name.
const URL_ATTRS: &[&str] = &["src", "href", "poster", "data", "action", "formaction"];

const META_URL_PROPERTIES: &[&str] = &[
    "og:image",
    "og:image:url",
    "og:image:secure_url",
    "og:video",
    "og:audio",
    "twitter:image",
    "twitter:image:src",
];

/// Rewrites a `srcset`/`imagesrcset` value: comma-separated candidates, each
/// `<url> [descriptor]`; only the URL component is rewritten, the descriptor
/// (`2x`, `480w`) is preserved verbatim.
fn rewrite_srcset(base: &Url, map: &UrlMap, value: &str) -> String {
    value
        .split(',')
        .map(|candidate| {
            let trimmed = candidate.trim();
            let mut parts = trimmed.splitn(2, char::is_whitespace);
            let url_part = parts.next().unwrap_or("");
            let descriptor = parts.next();
            let rewritten = map.resolve(base, url_part).unwrap_or_else(|| url_part.to_string());
            match descriptor {
                Some(d) => format!("{rewritten} {}", d.trim()),
                None => rewritten,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rewrites `html` (fetched from `document_url`), returning the rewritten
/// bytes. `map` supplies the URL -> local-path lookups.
pub fn rewrite_html(html: &str, document_url: &Url, map: &UrlMap) -> Result<String> {
    let base = document_url.clone();
    let map_el = map.clone();
    let base_style_text = base.clone();
    let map_style_text = map.clone();

    let style_buffer: Rc<RefCell<String>> = Rc::new(RefCell::new(String::new()));

    let mut output = Vec::new();
    {
        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    element!("*", move |el| {
                        for attr in URL_ATTRS {
                            if let Some(value) = el.get_attribute(attr) {
                                if let Some(rewritten) = map_el.resolve(&base, &value) {
                                    el.set_attribute(attr, &rewritten).ok();
                                }
                            }
                        }
                        for attr in ["srcset", "imagesrcset"] {
                            if let Some(value) = el.get_attribute(attr) {
                                let rewritten = rewrite_srcset(&base, &map_el, &value);
                                el.set_attribute(attr, &rewritten).ok();
                            }
                        }
                        if let Some(value) = el.get_attribute("style") {
                            if value.contains("url(") {
                                let rewritten = rewrite_css(&value, &base, &map_el);
                                el.set_attribute("style", &rewritten).ok();
                            }
                        }

                        let data_attrs: Vec<String> = el
                            .attributes()
                            .iter()
                            .map(|a| a.name())
                            .filter(|n| n.starts_with("data-"))
                            .collect();
                        for name in data_attrs {
                            if let Some(value) = el.get_attribute(&name) {
                                if let Some(rewritten) = map_el.resolve(&base, &value) {
                                    el.set_attribute(&name, &rewritten).ok();
                                }
                            }
                        }

                        if el.tag_name().eq_ignore_ascii_case("meta") {
                            let key = el.get_attribute("property").or_else(|| el.get_attribute("name"));
                            let is_whitelisted = key.as_deref().map(|k| META_URL_PROPERTIES.contains(&k)).unwrap_or(false);
                            if is_whitelisted {
                                if let Some(content) = el.get_attribute("content") {
                                    if let Some(rewritten) = map_el.resolve(&base, &content) {
                                        el.set_attribute("content", &rewritten).ok();
                                    }
                                }
                            }
                        }

                        Ok(())
                    }),
                    text!("style", move |t| {
                        style_buffer.borrow_mut().push_str(t.as_str());
                        if t.last_in_text_node() {
                            let css: String = style_buffer.borrow_mut().drain(..).collect();
                            let rewritten = rewrite_css(&css, &base_style_text, &map_style_text);
                            t.replace(&rewritten, ContentType::Text);
                        } else {
                            t.remove();
                        }
                        Ok(())
                    }),
                ],
                ..Settings::default()
            },
            |chunk: &[u8]| output.extend_from_slice(chunk),
        );
        rewriter
            .write(html.as_bytes())
            .map_err(|e| ReconError::Config(format!("HTML rewrite failed: {e}")))?;
        rewriter.end().map_err(|e| ReconError::Config(format!("HTML rewrite failed: {e}")))?;
    }

    String::from_utf8(output).map_err(|e| ReconError::Config(format!("HTML rewrite produced invalid UTF-8: {e}")))
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
    fn rewrites_script_src_and_link_href() {
        let base = Url::parse("https://example.com/index.html").unwrap();
        let map = map_with(&base, &[("https://example.com/app.js", "app.js"), ("https://example.com/app.css", "app.css")]);
        let html = r#"<html><head><link rel="stylesheet" href="/app.css"></head><body><script src="/app.js"></script></body></html>"#;
        let rewritten = rewrite_html(html, &base, &map).unwrap();
        assert!(rewritten.contains(r#"href="app.css""#));
        assert!(rewritten.contains(r#"src="app.js""#));
    }

    #[test]
    fn pass_through_urls_are_untouched() {
        let base = Url::parse("https://example.com/").unwrap();
        let map = UrlMap::new(&base);
        let html = r#"<a href="#section">jump</a><a href="mailto:a@b.com">mail</a>"#;
        let rewritten = rewrite_html(html, &base, &map).unwrap();
        assert!(rewritten.contains(r#"href="#section""#));
        assert!(rewritten.contains(r#"href="mailto:a@b.com""#));
    }

    #[test]
    fn rewrites_srcset_candidates_preserving_descriptors() {
        let base = Url::parse("https://example.com/").unwrap();
        let map = map_with(
            &base,
            &[("https://example.com/a-1x.png", "a-1x.png"), ("https://example.com/a-2x.png", "a-2x.png")],
        );
        let html = r#"<img srcset="/a-1x.png 1x, /a-2x.png 2x">"#;
        let rewritten = rewrite_html(html, &base, &map).unwrap();
        assert!(rewritten.contains("a-1x.png 1x"));
        assert!(rewritten.contains("a-2x.png 2x"));
    }

    #[test]
    fn rewrites_inline_style_element_url() {
        let base = Url::parse("https://example.com/").unwrap();
        let map = map_with(&base, &[("https://example.com/bg.png", "bg.png")]);
        let html = r#"<style>body { background: url(/bg.png); }</style>"#;
        let rewritten = rewrite_html(html, &base, &map).unwrap();
        assert!(rewritten.contains("url(bg.png)"));
    }
}
