//! Capture phase glue (C9 tie-in, spec §4.12): drives a `Page` through one
//! URL, classifying every response it observes into an API fixture, a
//! static asset, or neither.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use url::Url;

use crate::capture::page::{Page, PageEvent, ResourceKind};
use crate::capture::{build_fixture, capture_asset, matches_any_pattern, CaptureLimits, CaptureOptions};
use crate::error::Result;
use crate::types::{ApiFixture, CapturedAsset};

/// Constructs a fresh `Page` per crawled URL. Grounded in the narrow `Page`
/// seam (`capture::page::Page`) so the orchestrator never depends on a
/// concrete browser implementation directly.
#[async_trait::async_trait]
pub trait PageFactory: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn Page>>;
}

/// Everything one page visit produced, folded into the WAL's
/// `capture:page:completed` payload shape.
#[derive(Debug, Clone, Default)]
pub struct PageCaptureOutcome {
    pub fixtures: Vec<ApiFixture>,
    pub assets: Vec<CapturedAsset>,
    pub discovered_urls: Vec<String>,
}

/// Navigates `page` to `url`, drains its event stream until navigation
/// settles, and classifies every response observed along the way.
pub async fn capture_page(
    page: &dyn Page,
    url: &str,
    site_root: &Url,
    output_root: &Path,
    api_options: &CaptureOptions,
    asset_limits: &CaptureLimits,
) -> Result<PageCaptureOutcome> {
    page.goto(url).await?;

    let mut outcome = PageCaptureOutcome::default();
    let mut pending_responses: HashMap<String, crate::capture::page::ResponseEvent> = HashMap::new();
    let mut ordinal_by_key: HashMap<String, u32> = HashMap::new();
    let captured_at = Utc::now().to_rfc3339();

    while let Some(event) = page.next_event().await {
        match event {
            PageEvent::Request(_) => {}
            PageEvent::Response(response) => {
                pending_responses.insert(response.request_id.clone(), response);
            }
            PageEvent::Navigated(nav) => {
                if let Ok(discovered) = Url::parse(&nav.url) {
                    outcome.discovered_urls.push(discovered.to_string());
                }
            }
        }
    }

    for (request_id, response) in pending_responses {
        let body = match page.response_body(&request_id).await {
            Ok(b) => b,
            Err(e) => {
                warn!("no body for {}: {e}", response.url);
                continue;
            }
        };

        if matches_any_pattern(&response.url, &api_options.include_patterns) {
            let key = format!("{}|{}", response.url, response.status);
            let ordinal = ordinal_by_key.entry(key).or_insert(0);
            if let Some(fixture) = build_fixture(&response, "GET", &body, 0, url, &captured_at, *ordinal) {
                outcome.fixtures.push(fixture);
            }
            *ordinal += 1;
            continue;
        }

        if response.resource_kind.is_static_asset() {
            let is_entrypoint = response.url == url;
            if let Some(asset) = capture_asset(output_root, site_root, &response, &body, is_entrypoint, asset_limits).await? {
                outcome.assets.push(asset);
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::page::fake::FakePage;
    use crate::capture::page::{RequestEvent, ResponseEvent};

    #[tokio::test]
    async fn classifies_api_response_as_fixture() {
        let page = FakePage::new("https://example.com/", "<html></html>")
            .with_event(PageEvent::Request(RequestEvent {
                request_id: "1".to_string(),
                url: "https://example.com/api/users".to_string(),
                method: "GET".to_string(),
                resource_kind: ResourceKind::Xhr,
                headers: vec![],
            }))
            .with_event(PageEvent::Response(ResponseEvent {
                request_id: "1".to_string(),
                url: "https://example.com/api/users".to_string(),
                status: 200,
                ok: true,
                resource_kind: ResourceKind::Xhr,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                content_type: Some("application/json".to_string()),
            }))
            .with_body("1", br#"[{"id":1}]"#.to_vec());

        let site_root = Url::parse("https://example.com/").unwrap();
        let tmp = std::env::temp_dir().join(format!("sitesource-capture-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&tmp).await.unwrap();

        let outcome = capture_page(
            &page,
            "https://example.com/",
            &site_root,
            &tmp,
            &CaptureOptions::default(),
            &CaptureLimits::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.fixtures.len(), 1);
        assert!(outcome.assets.is_empty());

        tokio::fs::remove_dir_all(&tmp).await.ok();
    }
}
