//! Fixture-driven integration tests reproducing spec §8's literal end-to-end
//! scenarios against the real pipeline: HTTP discovery over a mock server,
//! source-map parsing/extraction, reconstruction to disk, and version
//! attribution, composed the way the orchestrator composes them rather than
//! unit-by-unit.

use std::path::{Path, PathBuf};

use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sitesource::bundles::discover_bundles;
use sitesource::http::{HttpClient, HttpConfig};
use sitesource::reconstruct::materialize_bundle;
use sitesource::sourcemap::{discover, extract, parse_and_validate};
use sitesource::version::{detect_version, VersionDetectionOptions};

struct TempDir(PathBuf);

impl TempDir {
    fn new(label: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("sitesource-it-{label}-{}-{}", std::process::id(), unique()));
        std::fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn unique() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
}

/// Scenario 1: Vite-built bundle with an external v3 source map, reached
/// through the page HTML's `<link modulepreload>`/`<script type=module>`
/// pair. Expects two ExtractedSources at `src/index.ts` and `src/util.ts`,
/// no errors, and both files written to disk.
#[tokio::test]
async fn scenario_1_vite_bundle_with_external_map() {
    let server = MockServer::start().await;

    let page_html = format!(
        r#"<html><head>
            <link rel="modulepreload" href="/assets/app-abc123.js">
            <script type="module" src="/assets/app-abc123.js"></script>
        </head><body></body></html>"#
    );
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_html))
        .mount(&server)
        .await;

    let bundle_js = "console.log('hi');\n//# sourceMappingURL=app-abc123.js.map";
    Mock::given(method("GET"))
        .and(path("/assets/app-abc123.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string(bundle_js))
        .mount(&server)
        .await;

    let map_json = serde_json::json!({
        "version": 3,
        "sources": ["src/index.ts", "webpack://app/./src/util.ts"],
        "sourcesContent": ["a", "b"],
        "mappings": "AAAA"
    })
    .to_string();
    Mock::given(method("GET"))
        .and(path("/assets/app-abc123.js.map"))
        .respond_with(ResponseTemplate::new(200).set_body_string(map_json))
        .mount(&server)
        .await;

    let http = HttpClient::new(HttpConfig::default()).unwrap();

    let page_url = Url::parse(&server.uri()).unwrap();
    let page_response = http.get(page_url.as_str()).await.unwrap();
    let bundles = discover_bundles(&page_response.body, &page_url);
    assert_eq!(bundles.len(), 2, "one script tag and one modulepreload link to the same bundle");

    let bundle_url_str = format!("{}/assets/app-abc123.js", server.uri());
    let bundle_response = http.get(&bundle_url_str).await.unwrap();
    let bundle_url = Url::parse(&bundle_url_str).unwrap();

    let discovered = discover(&http, &bundle_url, &bundle_response.headers, &bundle_response.body, false)
        .await
        .expect("directive must be found");
    let map_url = discovered.url.expect("map is external, not inline");

    let map_text = http.get(&map_url).await.unwrap().body;
    let parsed = parse_and_validate(&map_text).unwrap();
    let extraction = extract(&parsed, &bundle_url_str, &map_url);

    assert!(extraction.errors.is_empty());
    assert_eq!(extraction.files.len(), 2);
    let paths: Vec<&str> = extraction.files.iter().map(|f| f.path.as_str()).collect();
    assert!(paths.contains(&"src/index.ts"));
    assert!(paths.contains(&"src/util.ts"));

    let dir = TempDir::new("scenario1");
    let (manifest, write_errors) = materialize_bundle(dir.path(), &bundle_url_str, &map_url, &extraction.files).await;
    assert!(write_errors.is_empty());
    assert_eq!(manifest.files.len(), 2);
    let bundle_dir = sitesource::reconstruct::bundle_dir_name(&bundle_url_str);
    assert!(dir.path().join(&bundle_dir).join("src/index.ts").exists());
    assert!(dir.path().join(&bundle_dir).join("src/util.ts").exists());
}

/// Scenario 2: a bundle with neither a header nor a directive, whose
/// `.map` probe is an SPA's HTML fallback. Discovery must return nothing,
/// and no extraction may be attempted.
#[tokio::test]
async fn scenario_2_spa_html_masquerading_as_map_is_rejected() {
    let server = MockServer::start().await;

    let bundle_js = "console.log('no directive here');";
    Mock::given(method("GET"))
        .and(path("/bundle.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string(bundle_js))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/bundle.js.map"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<!DOCTYPE html><html><body>Not Found</body></html>")
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;

    let http = HttpClient::new(HttpConfig::default()).unwrap();
    let bundle_url_str = format!("{}/bundle.js", server.uri());
    let bundle_response = http.get(&bundle_url_str).await.unwrap();
    let bundle_url = Url::parse(&bundle_url_str).unwrap();

    let discovered = discover(&http, &bundle_url, &bundle_response.headers, &bundle_response.body, false).await;
    assert!(discovered.is_none(), "an HTML SPA fallback body must never be treated as a source map");
}

/// Scenario 3: inline base64 data-URI source map. One ExtractedSource at
/// `inline.ts` with content `"x"`.
#[tokio::test]
async fn scenario_3_inline_base64_data_uri_map() {
    let inner_map = serde_json::json!({
        "version": 3,
        "sources": ["inline.ts"],
        "sourcesContent": ["x"],
        "mappings": "AAAA"
    })
    .to_string();
    let encoded = {
        use base64::{engine::general_purpose::STANDARD, Engine};
        STANDARD.encode(inner_map.as_bytes())
    };
    let bundle_js = format!("console.log(1);\n//# sourceMappingURL=data:application/json;base64,{encoded}");

    let bundle_url = Url::parse("https://example.com/main.js").unwrap();
    let found = sitesource::sourcemap::discovery::from_directive(&bundle_js, &bundle_url).unwrap();
    assert_eq!(found.location_type, sitesource::sourcemap::LocationType::InlineDataUri);

    let parsed = parse_and_validate(&found.inline_content.unwrap()).unwrap();
    let extraction = extract(&parsed, "https://example.com/main.js", "https://example.com/main.js");

    assert_eq!(extraction.files.len(), 1);
    assert_eq!(extraction.files[0].path, "inline.ts");
    assert_eq!(extraction.files[0].content, "x");
}

/// Scenario 4: a pnpm-store-shaped `node_modules/.pnpm/...` path resolves
/// at exact/lockfile-path confidence, not the generic sourcemap-path tier.
#[test]
fn scenario_4_pnpm_lockfile_path_detection() {
    let result = detect_version(
        "react",
        None,
        &["node_modules/.pnpm/[email protected]/node_modules/react/index.js".to_string()],
        None,
        None,
        &VersionDetectionOptions::default(),
    )
    .unwrap();
    assert_eq!(result.version, "18.2.0");
    assert_eq!(result.confidence, sitesource::types::Confidence::Exact);
    assert_eq!(result.source, sitesource::types::VersionSource::LockfilePath);
}

/// Scenario 5: a version-shaped number embedded in a URL inside a comment
/// must not be mistaken for the package's own declared version.
#[test]
fn scenario_5_url_embedded_version_is_filtered() {
    let content = r#"/* see http://spec.org/?version=1.1.1 */ export const VERSION = '3.4.5';"#;
    let result = detect_version("mylib", None, &[], Some(content), None, &VersionDetectionOptions::default()).unwrap();
    assert_eq!(result.version, "3.4.5");
}

/// Scenario 6: a WAL with three valid events followed by one corrupt line
/// is read up to the corruption point, flags it precisely, and refuses
/// compaction.
#[tokio::test]
async fn scenario_6_wal_recovery_with_corruption() {
    use sitesource::wal::{apply_event, compact, read_wal, StateFile, WalEvent, WalEventPayload, WAL_FILE_NAME};

    let dir = TempDir::new("scenario6");
    let wal_path = dir.path().join(WAL_FILE_NAME);

    let mut content = String::new();
    for seq in 1..=3u64 {
        let event = WalEvent {
            seq,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            payload: WalEventPayload::ExtractBundle { bundle_name: format!("bundle-{seq}.js") },
        };
        content.push_str(&serde_json::to_string(&event).unwrap());
        content.push('\n');
    }
    content.push_str("{corrupt\n");
    tokio::fs::write(&wal_path, &content).await.unwrap();

    let result = read_wal(&wal_path).await.unwrap();
    assert_eq!(result.events.len(), 3);
    assert!(result.corrupted);
    assert_eq!(result.corrupted_at_line, Some(4));
    assert!(result.corrupted_content.as_ref().unwrap().len() <= 200);

    let mut state = StateFile::default();
    for event in &result.events {
        apply_event(&mut state, event);
    }
    assert_eq!(state.last_seq, 3);
    assert!(state.extracted_bundles.contains("bundle-3.js"));

    let compacted = compact(dir.path(), &state).await;
    assert!(compacted.is_err(), "compaction must refuse on a corrupted WAL tail");
}
