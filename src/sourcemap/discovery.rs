//! Source-map location discovery (C3, spec §4.3): HTTP header, then in-file
//! directive scan, then `.map` suffix probing, in that precedence order.

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::HeaderMap;
use url::Url;

use crate::http::HttpClient;

/// How a source map URL was located (spec §4.3: five variants, used for
/// diagnostics and for the `_server/manifest.json`-style provenance notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationType {
    HttpHeader,
    JsComment,
    CssComment,
    InlineDataUri,
    UrlProbe,
}

#[derive(Debug, Clone)]
pub struct DiscoveredMap {
    pub location_type: LocationType,
    /// Absolute URL, or `None` when the map was inline (data: URI already
    /// decoded into `inline_content`).
    pub url: Option<String>,
    pub inline_content: Option<String>,
}

const SOURCEMAP_HEADER: &str = "SourceMap";
const SOURCEMAP_HEADER_LEGACY: &str = "X-SourceMap";

/// Step 1: `SourceMap` / `X-SourceMap` response header, resolved against the
/// bundle's own (possibly redirected) final URL.
pub fn from_header(headers: &HeaderMap, bundle_url: &Url) -> Option<String> {
    let raw = headers
        .get(SOURCEMAP_HEADER)
        .or_else(|| headers.get(SOURCEMAP_HEADER_LEGACY))?
        .to_str()
        .ok()?
        .trim();
    resolve_map_reference(raw, bundle_url)
}

/// A minimal comment/code lexer implementing the ECMA-426 "last URL wins,
/// reset on code" scan: walk the source left to right, tracking whether
/// we're inside a line comment, a block comment, or a string/template
/// literal. Every time a `sourceMappingURL=` directive is seen *inside a
/// comment*, it becomes the new candidate. Every time a non-whitespace
/// token is seen *outside any comment* (including the start of a string
/// literal — executable code, not a comment), the candidate resets to
/// `None`. Block comments only ever reset when they aren't a directive
/// comment; whitespace never resets.
///
/// `css_only`: when true, only `/* ... */` directives are recognised (CSS
/// has no `//` line comments), matching `LocationType::CssComment`.
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn scan_last_directive(content: &str, css_only: bool) -> Option<String> {
    let directive_re = regex::Regex::new(r"^[#@]\s*sourceMappingURL\s*=\s*(\S+)").expect("static regex is valid");

    // Byte-oriented scan: all syntax this function recognises (`//`, `/*`,
    // `*/`, quotes, whitespace, the directive text itself) is ASCII, so we
    // never need a UTF-8 char boundary except when slicing out a comment
    // body for the regex — there we use `from_utf8_lossy`, which is safe on
    // any byte range even mid-codepoint.
    let bytes = content.as_bytes();
    let len = bytes.len();
    let mut i = 0usize;
    let mut last_url: Option<String> = None;
    let mut in_string: Option<u8> = None;

    while i < len {
        let c = bytes[i];

        if let Some(quote) = in_string {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }

        // Line comment.
        if !css_only && c == b'/' && i + 1 < len && bytes[i + 1] == b'/' {
            let start = i + 2;
            let end = bytes[start..].iter().position(|&b| b == b'\n').map(|p| start + p).unwrap_or(len);
            let comment_body = String::from_utf8_lossy(&bytes[start..end]);
            let trimmed = comment_body.trim_start();
            if let Some(caps) = directive_re.captures(trimmed) {
                last_url = Some(caps[1].trim().to_string());
            } else {
                // A non-directive comment is still a comment: it does not
                // reset the candidate (spec: reset happens on *code*).
            }
            i = end;
            continue;
        }

        // Block comment.
        if c == b'/' && i + 1 < len && bytes[i + 1] == b'*' {
            let start = i + 2;
            let end = find_subslice(&bytes[start..], b"*/").map(|p| start + p).unwrap_or(len);
            let comment_body = String::from_utf8_lossy(&bytes[start..end]);
            let trimmed = comment_body.trim_start();
            if let Some(caps) = directive_re.captures(trimmed) {
                last_url = Some(caps[1].trim().to_string());
            }
            i = if end < len { end + 2 } else { len };
            continue;
        }

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if !css_only && (c == b'"' || c == b'\'' || c == b'`') {
            in_string = Some(c);
            last_url = None;
            i += 1;
            continue;
        }

        // Any other non-whitespace, non-comment byte is code: reset.
        last_url = None;
        i += 1;
    }

    last_url
}

/// Step 2 (JS bundles): in-file `//# sourceMappingURL=` / `/*# ... */`
/// directive, per the ECMA-426 last-URL-wins-with-reset-on-code algorithm.
pub fn from_directive(content: &str, bundle_url: &Url) -> Option<DiscoveredMap> {
    from_directive_impl(content, bundle_url, false, LocationType::JsComment)
}

/// Step 2 (CSS bundles): same directive, but only `/* ... */` comments are
/// legal — CSS has no line-comment syntax.
pub fn from_css_directive(content: &str, bundle_url: &Url) -> Option<DiscoveredMap> {
    from_directive_impl(content, bundle_url, true, LocationType::CssComment)
}

fn from_directive_impl(
    content: &str,
    bundle_url: &Url,
    css_only: bool,
    location_type: LocationType,
) -> Option<DiscoveredMap> {
    let raw = scan_last_directive(content, css_only)?;

    if let Some(decoded) = decode_inline_data_uri(&raw) {
        return Some(DiscoveredMap {
            location_type: LocationType::InlineDataUri,
            url: None,
            inline_content: Some(decoded),
        });
    }

    resolve_map_reference(&raw, bundle_url).map(|url| DiscoveredMap {
        location_type,
        url: Some(url),
        inline_content: None,
    })
}

fn resolve_map_reference(raw: &str, bundle_url: &Url) -> Option<String> {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    bundle_url.join(raw).ok().map(|u| u.to_string())
}

/// Decodes a `data:application/json[;charset=...];base64,<data>` URI.
/// Returns `None` for anything not shaped like a base64 JSON data URI.
pub fn decode_inline_data_uri(candidate: &str) -> Option<String> {
    if !candidate.starts_with("data:") {
        return None;
    }
    let marker = ";base64,";
    let start = candidate.find(marker)?;
    let encoded = &candidate[start + marker.len()..];
    let decoded = STANDARD.decode(encoded).ok()?;
    String::from_utf8(decoded).ok()
}

/// Content-Type allow-list for step 3 probing: accept only types that could
/// plausibly be a JSON source map, never HTML error pages.
fn probe_content_type_allowed(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("json") || ct.contains("sourcemap") || ct.contains("text/plain") || ct.contains("application/octet-stream")
}

fn looks_like_source_map(body: &str) -> bool {
    let trimmed = body.trim_start();
    trimmed.starts_with('{') && body.contains("\"version\"") && (body.contains("\"sources\"") || body.contains("\"mappings\"") || body.contains("\"sections\""))
}

/// Candidate `.map` suffix variations tried during step 3, in priority
/// order: exact `<url>.map`, then swap a trailing query/hash for `.map`.
pub fn map_suffix_variations(bundle_url: &Url) -> Vec<String> {
    let mut out = Vec::new();
    let base = bundle_url.as_str();
    if let Some(without_query) = base.split(['?', '#']).next() {
        out.push(format!("{without_query}.map"));
    }
    out.push(format!("{base}.map"));
    out.dedup();
    out
}

/// Step 3: HEAD/GET-probe `<bundle>.map`, accepting only an allow-listed
/// Content-Type and rejecting an HTML SPA-404-fallback body outright.
pub async fn probe(http: &HttpClient, bundle_url: &Url) -> Option<DiscoveredMap> {
    for candidate in map_suffix_variations(bundle_url) {
        let response = match http.get(&candidate).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        if !response.status.is_success() {
            continue;
        }
        if let Some(ref ct) = response.content_type {
            if ct.to_ascii_lowercase().contains("text/html") {
                continue;
            }
            if !probe_content_type_allowed(ct) {
                continue;
            }
        }
        if looks_like_source_map(&response.body) {
            return Some(DiscoveredMap {
                location_type: LocationType::UrlProbe,
                url: Some(candidate),
                inline_content: Some(response.body),
            });
        }
    }
    None
}

/// Full C3 precedence chain: header wins outright (spec §9 Open Question
/// decision), then directive, then probe. `is_css` selects the JS vs CSS
/// comment-directive variant.
pub async fn discover(
    http: &HttpClient,
    bundle_url: &Url,
    response_headers: &HeaderMap,
    bundle_body: &str,
    is_css: bool,
) -> Option<DiscoveredMap> {
    if let Some(url) = from_header(response_headers, bundle_url) {
        return Some(DiscoveredMap {
            location_type: LocationType::HttpHeader,
            url: Some(url),
            inline_content: None,
        });
    }

    let directive = if is_css {
        from_css_directive(bundle_body, bundle_url)
    } else {
        from_directive(bundle_body, bundle_url)
    };
    if let Some(found) = directive {
        return Some(found);
    }

    probe(http, bundle_url).await
}
