//! `_server/manifest.json`, `_server/fixtures/_index.json`, and
//! per-fixture files (spec §6) for the mock API/static server a
//! reconstructed app ships alongside its sources.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::error::Result;
use crate::types::{ApiFixture, RedirectEdge};

pub const SERVER_DIR: &str = "_server";
pub const FIXTURES_DIR: &str = "fixtures";
pub const FIXTURES_INDEX_FILE: &str = "_index.json";

/// Escapes a fixture's URL pattern into a filesystem-safe file name stem:
/// every character that isn't alphanumeric, `-`, or `_` becomes `_`, and
/// path-separating `/` collapses the same way, matching the `<method>_
/// <escaped-pattern>.json` naming spec §6 requires.
pub fn escape_pattern(pattern: &str) -> String {
    pattern
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

pub fn fixture_file_name(fixture: &ApiFixture) -> String {
    format!("{}_{}.json", fixture.request.method.to_lowercase(), escape_pattern(&fixture.request.pattern))
}

#[derive(Debug, Clone, Serialize)]
struct FixtureIndexEntry {
    id: String,
    method: String,
    pattern: String,
    priority: u32,
    file: String,
}

/// Server descriptor embedded in `_server/manifest.json`'s `server` field.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub default_port: u16,
    pub cors: bool,
    pub delay_enabled: bool,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self { default_port: 4000, cors: true, delay_enabled: false, delay_min_ms: 0, delay_max_ms: 0 }
    }
}

#[derive(Debug, Clone)]
pub struct StaticOptions {
    pub enabled: bool,
    pub entrypoint: String,
    pub asset_count: usize,
    pub path_prefix: Option<String>,
}

/// Builds `_server/manifest.json`'s document.
pub fn build_server_manifest(
    name: &str,
    source_url: &str,
    captured_at: &str,
    server: &ServerOptions,
    fixtures: &[ApiFixture],
    static_opts: &StaticOptions,
    redirects: &[RedirectEdge],
) -> Value {
    let mut doc = json!({
        "name": name,
        "sourceUrl": source_url,
        "capturedAt": captured_at,
        "server": {
            "defaultPort": server.default_port,
            "cors": server.cors,
            "delay": {
                "enabled": server.delay_enabled,
                "minMs": server.delay_min_ms,
                "maxMs": server.delay_max_ms,
            },
        },
        "routes": { "api": "/api", "static": "/" },
        "fixtures": { "count": fixtures.len(), "indexFile": format!("{FIXTURES_DIR}/{FIXTURES_INDEX_FILE}") },
        "static": {
            "enabled": static_opts.enabled,
            "entrypoint": static_opts.entrypoint,
            "assetCount": static_opts.asset_count,
            "pathPrefix": static_opts.path_prefix,
        },
    });

    if !redirects.is_empty() {
        doc["redirects"] = json!(redirects);
    }

    doc
}

/// Builds `_server/fixtures/_index.json`: fixtures sorted by priority
/// descending, ties broken by pattern for determinism.
pub fn build_fixtures_index(generated_at: &str, fixtures: &[ApiFixture]) -> Value {
    let mut sorted: Vec<&ApiFixture> = fixtures.iter().collect();
    sorted.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.request.pattern.cmp(&b.request.pattern)));

    let entries: Vec<FixtureIndexEntry> = sorted
        .iter()
        .map(|f| FixtureIndexEntry {
            id: f.id.clone(),
            method: f.request.method.clone(),
            pattern: f.request.pattern.clone(),
            priority: f.priority,
            file: fixture_file_name(f),
        })
        .collect();

    json!({ "generatedAt": generated_at, "fixtures": entries })
}

/// Writes the full `_server/` tree: manifest, fixtures index, and one
/// pretty-printed JSON file per fixture.
pub async fn write_server_tree(
    output_root: &Path,
    name: &str,
    source_url: &str,
    captured_at: &str,
    server: &ServerOptions,
    fixtures: &[ApiFixture],
    static_opts: &StaticOptions,
    redirects: &[RedirectEdge],
) -> Result<()> {
    let server_dir: PathBuf = output_root.join(SERVER_DIR);
    let fixtures_dir = server_dir.join(FIXTURES_DIR);
    fs::create_dir_all(&fixtures_dir).await?;

    let manifest = build_server_manifest(name, source_url, captured_at, server, fixtures, static_opts, redirects);
    fs::write(server_dir.join("manifest.json"), serde_json::to_vec_pretty(&manifest)?).await?;

    let index = build_fixtures_index(captured_at, fixtures);
    fs::write(fixtures_dir.join(FIXTURES_INDEX_FILE), serde_json::to_vec_pretty(&index)?).await?;

    for fixture in fixtures {
        let path = fixtures_dir.join(fixture_file_name(fixture));
        fs::write(path, serde_json::to_vec_pretty(fixture)?).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApiFixtureMetadata, ApiRequest, ApiResponse, BodyType};

    fn fixture(method: &str, pattern: &str, priority: u32) -> ApiFixture {
        ApiFixture {
            id: format!("{method}-{pattern}"),
            request: ApiRequest {
                method: method.to_string(),
                url: format!("https://example.com{pattern}"),
                path: pattern.to_string(),
                pattern: pattern.to_string(),
                path_params: vec![],
                query: vec![],
                headers: vec![],
                body: None,
            },
            response: ApiResponse {
                status: 200,
                status_text: "OK".to_string(),
                headers: vec![],
                body: "{}".to_string(),
                body_type: BodyType::Json,
            },
            metadata: ApiFixtureMetadata {
                captured_at: "2026-01-01T00:00:00Z".to_string(),
                response_time_ms: 10,
                source_page_url: "https://example.com/".to_string(),
            },
            priority,
        }
    }

    #[test]
    fn escape_pattern_replaces_non_alphanumerics() {
        assert_eq!(escape_pattern("/api/users/:id"), "_api_users__id");
    }

    #[test]
    fn fixture_file_name_lowercases_method() {
        let f = fixture("GET", "/api/users/:id", 2);
        assert_eq!(fixture_file_name(&f), "get__api_users__id.json");
    }

    #[test]
    fn fixtures_index_sorts_by_priority_desc() {
        let fixtures = vec![fixture("GET", "/api/a", 1), fixture("GET", "/api/b/:id", 3), fixture("GET", "/api/c", 2)];
        let index = build_fixtures_index("2026-01-01T00:00:00Z", &fixtures);
        let patterns: Vec<&str> = index["fixtures"].as_array().unwrap().iter().map(|e| e["pattern"].as_str().unwrap()).collect();
        assert_eq!(patterns, vec!["/api/b/:id", "/api/c", "/api/a"]);
    }

    #[test]
    fn server_manifest_omits_redirects_when_empty() {
        let doc = build_server_manifest(
            "app",
            "https://example.com",
            "2026-01-01T00:00:00Z",
            &ServerOptions::default(),
            &[],
            &StaticOptions { enabled: true, entrypoint: "index.html".to_string(), asset_count: 0, path_prefix: None },
            &[],
        );
        assert!(doc.get("redirects").is_none());
    }
}
