//! Static asset capture and local-path mapping (C9, spec §4.9): for every
//! response a crawled page observes, decides whether it's a static asset
//! worth saving, where it lands on disk, and writes it atomically.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};
use url::Url;

use crate::capture::page::ResponseEvent;
use crate::error::Result;
use crate::types::CapturedAsset;

#[derive(Debug, Clone)]
pub struct CaptureLimits {
    pub max_body_bytes: usize,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self { max_body_bytes: 50 * 1024 * 1024 }
    }
}

const SAME_SITE_SUBDOMAIN_PREFIXES: &[&str] = &["www.", "cdn.", "static.", "assets.", "images.", "media."];

fn strip_known_subdomain(host: &str) -> &str {
    for prefix in SAME_SITE_SUBDOMAIN_PREFIXES {
        if let Some(rest) = host.strip_prefix(prefix) {
            return rest;
        }
    }
    host
}

fn sanitize_path_component(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Derives the relative on-disk path for a captured asset (spec §4.9):
/// same-origin pathnames map verbatim, root maps to `index.html`, an
/// extensionless pathname gets an implicit `/index.html`, a recognised
/// same-site subdomain lands under `_<sub>/...`, and everything else
/// cross-origin lands under `_external/<hash>_<name>`.
pub fn local_path_for(site_root: &Url, asset_url: &Url) -> String {
    let same_origin = site_root.origin() == asset_url.origin();
    let same_site = asset_url
        .host_str()
        .zip(site_root.host_str())
        .map(|(a, s)| strip_known_subdomain(a) == strip_known_subdomain(s))
        .unwrap_or(false);

    if same_origin {
        normalized_pathname(asset_url)
    } else if same_site {
        let subdomain_label = asset_url.host_str().unwrap_or("external");
        format!("_{}/{}", sanitize_path_component(subdomain_label), normalized_pathname(asset_url))
    } else {
        let digest = crate::cache::content_key(asset_url.as_str().as_bytes());
        let file_name = asset_url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|s| !s.is_empty())
            .unwrap_or("asset");
        format!("_external/{}_{}", &digest[..12], sanitize_path_component(file_name))
    }
}

fn normalized_pathname(url: &Url) -> String {
    let path = url.path();
    if path == "/" || path.is_empty() {
        return "index.html".to_string();
    }
    let trimmed = path.trim_start_matches('/');
    let segments: Vec<String> = trimmed.split('/').map(sanitize_path_component).collect();
    let joined = segments.join("/");
    let has_extension = Path::new(&joined).extension().is_some();
    if has_extension || joined.ends_with('/') {
        joined.trim_end_matches('/').to_string()
    } else {
        format!("{joined}/index.html")
    }
}

fn is_data_uri(url: &str) -> bool {
    url.starts_with("data:")
}

/// Captures one response body to disk under `output_root`, returning the
/// `CapturedAsset` record on success. Returns `Ok(None)` for responses this
/// capture pass declines to save: data URIs, non-2xx statuses, or bodies
/// over the configured limit — never an error, since declining is routine.
pub async fn capture_asset(
    output_root: &Path,
    site_root: &Url,
    response: &ResponseEvent,
    body: &[u8],
    is_entrypoint: bool,
    limits: &CaptureLimits,
) -> Result<Option<CapturedAsset>> {
    if is_data_uri(&response.url) {
        return Ok(None);
    }
    if !response.ok {
        debug!("skipping non-2xx asset {} ({})", response.url, response.status);
        return Ok(None);
    }
    if body.len() > limits.max_body_bytes {
        warn!("skipping oversized asset {} ({} bytes)", response.url, body.len());
        return Ok(None);
    }

    let asset_url = Url::parse(&response.url).map_err(crate::error::ReconError::UrlError)?;
    let local_path = if is_entrypoint {
        "index.html".to_string()
    } else {
        local_path_for(site_root, &asset_url)
    };

    let target = output_root.join(&local_path);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = temp_sibling(&target);
    fs::write(&tmp_path, body).await?;
    fs::rename(&tmp_path, &target).await?;

    Ok(Some(CapturedAsset {
        url: response.url.clone(),
        local_path,
        content_type: response.content_type.clone(),
        size: body.len(),
        is_entrypoint,
    }))
}

fn temp_sibling(target: &Path) -> PathBuf {
    let file_name = target.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    target.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_origin_pathname_maps_verbatim() {
        let root = Url::parse("https://example.com/").unwrap();
        let asset = Url::parse("https://example.com/static/app.js").unwrap();
        assert_eq!(local_path_for(&root, &asset), "static/app.js");
    }

    #[test]
    fn root_pathname_maps_to_index_html() {
        let root = Url::parse("https://example.com/").unwrap();
        let asset = Url::parse("https://example.com/").unwrap();
        assert_eq!(local_path_for(&root, &asset), "index.html");
    }

    #[test]
    fn extensionless_pathname_gets_implicit_index() {
        let root = Url::parse("https://example.com/").unwrap();
        let asset = Url::parse("https://example.com/about").unwrap();
        assert_eq!(local_path_for(&root, &asset), "about/index.html");
    }

    #[test]
    fn recognised_subdomain_maps_under_underscore_prefix() {
        let root = Url::parse("https://example.com/").unwrap();
        let asset = Url::parse("https://cdn.example.com/logo.png").unwrap();
        assert_eq!(local_path_for(&root, &asset), "_cdn.example.com/logo.png");
    }

    #[test]
    fn cross_origin_maps_under_external_with_hash() {
        let root = Url::parse("https://example.com/").unwrap();
        let asset = Url::parse("https://fonts.googleapis.com/css?family=Roboto").unwrap();
        let mapped = local_path_for(&root, &asset);
        assert!(mapped.starts_with("_external/"));
    }
}
