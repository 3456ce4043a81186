//! API fixture recorder (C9, spec §4.9): matches responses against
//! configured glob patterns, builds an `ApiFixture` per match with a
//! parameterised route pattern, path params, parsed query, and a
//! decoded body typed by content-type.

use url::Url;

use crate::cache::content_key;
use crate::capture::page::ResponseEvent;
use crate::types::{ApiFixture, ApiFixtureMetadata, ApiRequest, ApiResponse, BodyType};

/// Response headers worth preserving in a fixture; everything else (hop-by-
/// hop headers, `set-cookie`, timing headers) is dropped to keep fixtures
/// small and to avoid leaking session state into a replayable mock.
const HEADER_ALLOWLIST: &[&str] = &["content-type", "cache-control", "etag", "x-total-count", "link"];

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Default glob patterns: `**/api/**`, `**/graphql**` (spec §4.9).
    pub include_patterns: Vec<String>,
    pub max_body_bytes: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            include_patterns: vec!["**/api/**".to_string(), "**/graphql**".to_string()],
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Converts a `**`/`*` glob into an anchored regex. `**` matches across path
/// separators, `*` matches within one segment.
fn glob_to_regex(glob: &str) -> regex::Regex {
    let mut pattern = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    pattern.push_str(".*");
                } else {
                    pattern.push_str("[^/]*");
                }
            }
            c if regex_syntax::is_meta_character(c) => {
                pattern.push('\\');
                pattern.push(c);
            }
            c => pattern.push(c),
        }
    }
    pattern.push('$');
    regex::Regex::new(&pattern).unwrap_or_else(|_| regex::Regex::new("$^").unwrap())
}

pub fn matches_any_pattern(url: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| glob_to_regex(p).is_match(url))
}

/// Replaces numeric or UUID-looking path segments with `:paramN`
/// placeholders, returning the pattern and the extracted (name, value)
/// pairs in positional order.
pub fn derive_pattern(path: &str) -> (String, Vec<(String, String)>) {
    let uuid_re = regex::Regex::new(
        r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
    )
    .expect("static regex is valid");
    let numeric_re = regex::Regex::new(r"^\d+$").expect("static regex is valid");

    let mut params = Vec::new();
    let mut param_index = 0usize;

    let segments: Vec<String> = path
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                return segment.to_string();
            }
            if uuid_re.is_match(segment) || numeric_re.is_match(segment) {
                let name = format!("param{param_index}");
                params.push((name.clone(), segment.to_string()));
                param_index += 1;
                format!(":{name}")
            } else {
                segment.to_string()
            }
        })
        .collect();

    (segments.join("/"), params)
}

/// Priority = count of literal (non-param) path segments: more literal
/// segments means a more specific route, ranked first by the mock server.
pub fn pattern_priority(pattern: &str) -> u32 {
    pattern.split('/').filter(|s| !s.is_empty() && !s.starts_with(':')).count() as u32
}

fn is_json_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("json")
}

fn is_text_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("text/") || ct.contains("xml") || ct.contains("javascript")
}

fn decode_body(body: &[u8], content_type: Option<&str>) -> (String, BodyType) {
    match content_type {
        Some(ct) if is_json_content_type(ct) => {
            let text = String::from_utf8_lossy(body).to_string();
            (text, BodyType::Json)
        }
        Some(ct) if is_text_content_type(ct) => (String::from_utf8_lossy(body).to_string(), BodyType::Text),
        _ => match std::str::from_utf8(body) {
            Ok(s) if s.chars().all(|c| !c.is_control() || c.is_whitespace()) => (s.to_string(), BodyType::Text),
            _ => {
                use base64::Engine;
                (base64::engine::general_purpose::STANDARD.encode(body), BodyType::Binary)
            }
        },
    }
}

/// Builds one `ApiFixture` from a matched response, its body, and the page
/// context it was captured from. `ordinal` disambiguates multiple fixtures
/// sharing a method+pattern, feeding the deterministic id.
pub fn build_fixture(
    response: &ResponseEvent,
    method: &str,
    body: &[u8],
    response_time_ms: u64,
    source_page_url: &str,
    captured_at: &str,
    ordinal: u32,
) -> Option<ApiFixture> {
    let url = Url::parse(&response.url).ok()?;
    let path = url.path().to_string();
    let (pattern, path_params) = derive_pattern(&path);
    let priority = pattern_priority(&pattern);

    let query: Vec<(String, String)> = url.query_pairs().map(|(k, v)| (k.to_string(), v.to_string())).collect();

    let headers: Vec<(String, String)> = response
        .headers
        .iter()
        .filter(|(k, _)| HEADER_ALLOWLIST.contains(&k.to_ascii_lowercase().as_str()))
        .cloned()
        .collect();

    let (decoded_body, body_type) = decode_body(body, response.content_type.as_deref());

    let id = content_key(format!("{method}|{pattern}|{priority}|{ordinal}").as_bytes())[..16].to_string();

    Some(ApiFixture {
        id,
        request: ApiRequest {
            method: method.to_string(),
            url: response.url.clone(),
            path,
            pattern,
            path_params,
            query,
            headers: Vec::new(),
            body: None,
        },
        response: ApiResponse {
            status: response.status,
            status_text: String::new(),
            headers,
            body: decoded_body,
            body_type,
        },
        metadata: ApiFixtureMetadata {
            captured_at: captured_at.to_string(),
            response_time_ms,
            source_page_url: source_page_url.to_string(),
        },
        priority,
    })
}

/// Tiny local stand-in so this module does not need a regex-syntax crate
/// dependency just to know which ASCII punctuation needs escaping in a
/// hand-translated glob.
mod regex_syntax {
    pub fn is_meta_character(c: char) -> bool {
        matches!(c, '.' | '+' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '\\' | '?')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_nested_api_path() {
        assert!(matches_any_pattern("https://e.com/api/v1/users", &["**/api/**".to_string()]));
        assert!(!matches_any_pattern("https://e.com/assets/app.js", &["**/api/**".to_string()]));
    }

    #[test]
    fn derive_pattern_replaces_numeric_and_uuid_segments() {
        let (pattern, params) = derive_pattern("/api/users/42/posts/550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(pattern, "/api/users/:param0/posts/:param1");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], ("param0".to_string(), "42".to_string()));
    }

    #[test]
    fn priority_counts_literal_segments() {
        assert_eq!(pattern_priority("/api/users/:id"), 2);
        assert_eq!(pattern_priority("/api/:a/:b"), 1);
    }

    #[test]
    fn json_body_decodes_as_text_json() {
        let (text, kind) = decode_body(br#"{"ok":true}"#, Some("application/json"));
        assert_eq!(kind, BodyType::Json);
        assert_eq!(text, r#"{"ok":true}"#);
    }

    #[test]
    fn binary_body_base64_encodes() {
        let (text, kind) = decode_body(&[0xff, 0xd8, 0xff, 0x00], Some("image/jpeg"));
        assert_eq!(kind, BodyType::Binary);
        assert!(!text.is_empty());
    }
}
