//! Linear phase orchestrator (C12, spec §4.12): `scrape → extract →
//! dependencies → capture → rebuild`, each transition durably recorded in
//! the WAL before and after it runs. A phase already `completed` in
//! recovered state is a no-op; one recorded `in-progress` is simply
//! re-entered, since every phase's own operations (cache, atomic file
//! writes, idempotent WAL folding) are themselves safe to repeat.

pub mod capture;
pub mod dependencies;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::bundles::discover_bundles;
use crate::cache::{self, Namespace};
use crate::capture::{CaptureLimits, CaptureOptions};
use crate::crawl::{self, CrawlConfig, CrawlQueue, PageOutcome, VisitResult};
use crate::error::{ReconError, Result};
use crate::http::{HttpClient, HttpConfig};
use crate::manifest::{self, Mode, ServerOptions, StaticOptions};
use crate::reconstruct::{self, BundleManifest};
use crate::sourcemap;
use crate::types::{BundleKind, CapturedAsset};
use crate::version::VersionDetectionOptions;
use crate::wal::{Phase, Wal, WalEventPayload};

pub use capture::PageFactory;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub target_url: String,
    pub output_root: PathBuf,
    pub crawl: CrawlConfig,
    pub http: HttpConfig,
    pub capture_options: CaptureOptions,
    pub capture_limits: CaptureLimits,
    /// Whether pages are captured via a live browser (`Mode::Page`) or
    /// bundles are fetched directly without a DOM pass (`Mode::Direct`).
    pub mode: Mode,
}

/// The external collaborator's report on whether the reconstructed tree
/// actually builds and runs (spec §4.12: "delegated rebuild emission with
/// a RebuildResult the external collaborator populates").
#[derive(Debug, Clone)]
pub struct RebuildResult {
    pub success: bool,
    pub detail: Option<String>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    http: HttpClient,
    wal: Wal,
    page_factory: Option<Arc<dyn PageFactory>>,
    rebuilder: Option<Arc<dyn Rebuilder>>,
    /// Root cancellation signal threaded to every worker and HTTP operation
    /// (spec §5.9). Triggered by the CLI on Ctrl-C via `cancellation()`.
    cancel: CancellationToken,
}

/// The external collaborator that actually builds and smoke-tests the
/// reconstructed tree (spec §4.12's "delegated rebuild"). Kept out of scope
/// here deliberately — the orchestrator only knows how to record whatever
/// `RebuildResult` this produces.
#[async_trait::async_trait]
pub trait Rebuilder: Send + Sync {
    async fn rebuild(&self, output_root: &Path) -> RebuildResult;
}

impl Orchestrator {
    pub async fn new(
        config: OrchestratorConfig,
        page_factory: Option<Arc<dyn PageFactory>>,
        rebuilder: Option<Arc<dyn Rebuilder>>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.output_root).await?;
        let (state, wal_read) = crate::wal::load_current_state(&config.output_root).await?;
        if wal_read.corrupted {
            warn!(
                "WAL corrupted at line {:?}; resuming from the {} events applied before it",
                wal_read.corrupted_at_line,
                wal_read.events.len()
            );
        }
        let cancel = CancellationToken::new();
        let wal = Wal::open_with_cancellation(&config.output_root, state.last_seq, Some(cancel.clone())).await?;
        let http = HttpClient::new(config.http.clone()).map_err(ReconError::HttpError)?.with_cancellation(cancel.clone());
        Ok(Self { config, http, wal, page_factory, rebuilder, cancel })
    }

    /// Clone of the root cancellation token, for a caller (the CLI) to wire
    /// up a `Ctrl-C`/signal handler against before calling `run`.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn phase_status(&self, phase: Phase) -> Result<crate::wal::PhaseStatus> {
        let (state, _) = crate::wal::load_current_state(&self.config.output_root).await?;
        Ok(state.phase(phase).status.unwrap_or(crate::wal::PhaseStatus::Pending))
    }

    /// Runs every phase in order, skipping ones already completed in
    /// recovered state.
    pub async fn run(&self) -> Result<()> {
        let site_root = Url::parse(&self.config.target_url).map_err(ReconError::UrlError)?;

        if self.phase_status(Phase::Scrape).await? != crate::wal::PhaseStatus::Completed {
            self.wal.append(WalEventPayload::PhaseStart { phase: Phase::Scrape }).await?;
            match self.run_scrape(&site_root).await {
                Ok(_) => self.wal.append(WalEventPayload::PhaseComplete { phase: Phase::Scrape }).await?,
                Err(e) => {
                    self.wal.append(WalEventPayload::PhaseFail { phase: Phase::Scrape, error: e.to_string() }).await?;
                    return Err(e);
                }
            };
        }

        if self.phase_status(Phase::Extract).await? != crate::wal::PhaseStatus::Completed {
            self.wal.append(WalEventPayload::PhaseStart { phase: Phase::Extract }).await?;
            match self.run_extract(&site_root).await {
                Ok(_) => self.wal.append(WalEventPayload::PhaseComplete { phase: Phase::Extract }).await?,
                Err(e) => {
                    self.wal.append(WalEventPayload::PhaseFail { phase: Phase::Extract, error: e.to_string() }).await?;
                    return Err(e);
                }
            };
        }

        if self.phase_status(Phase::Dependencies).await? != crate::wal::PhaseStatus::Completed {
            self.wal.append(WalEventPayload::PhaseStart { phase: Phase::Dependencies }).await?;
            match self.run_dependencies().await {
                Ok(_) => self.wal.append(WalEventPayload::PhaseComplete { phase: Phase::Dependencies }).await?,
                Err(e) => {
                    self.wal
                        .append(WalEventPayload::PhaseFail { phase: Phase::Dependencies, error: e.to_string() })
                        .await?;
                    return Err(e);
                }
            };
        }

        if self.config.mode == Mode::Page && self.phase_status(Phase::Capture).await? != crate::wal::PhaseStatus::Completed
        {
            self.wal.append(WalEventPayload::PhaseStart { phase: Phase::Capture }).await?;
            match self.run_capture(&site_root).await {
                Ok(_) => self.wal.append(WalEventPayload::PhaseComplete { phase: Phase::Capture }).await?,
                Err(e) => {
                    self.wal.append(WalEventPayload::PhaseFail { phase: Phase::Capture, error: e.to_string() }).await?;
                    return Err(e);
                }
            };
        }

        if self.phase_status(Phase::Rebuild).await? != crate::wal::PhaseStatus::Completed {
            self.wal.append(WalEventPayload::PhaseStart { phase: Phase::Rebuild }).await?;
            let result = match &self.rebuilder {
                Some(rebuilder) => rebuilder.rebuild(&self.config.output_root).await,
                None => RebuildResult { success: true, detail: Some("no rebuilder configured; skipped".to_string()) },
            };
            self.wal
                .append(WalEventPayload::RebuildResult { success: result.success, detail: result.detail })
                .await?;
            if result.success {
                self.wal.append(WalEventPayload::PhaseComplete { phase: Phase::Rebuild }).await?;
            } else {
                self.wal
                    .append(WalEventPayload::PhaseFail {
                        phase: Phase::Rebuild,
                        error: "rebuild reported failure".to_string(),
                    })
                    .await?;
            }
        }

        crate::wal::compact(&self.config.output_root, &crate::wal::load_current_state(&self.config.output_root).await?.0)
            .await
            .ok();
        self.wal.append(WalEventPayload::WalCompacted).await?;

        Ok(())
    }

    /// BFS crawl (C8): fetches every in-scope page, extracts bundle
    /// references and links, and records the completed URL set.
    async fn run_scrape(&self, site_root: &Url) -> Result<()> {
        let queue = CrawlQueue::new(site_root.clone(), self.config.crawl.clone());
        let cancel = self.cancel.clone();
        let http = self.http.clone();
        let site_root = site_root.clone();

        let summary = crawl::run(queue, cancel, move |item| {
            let http = http.clone();
            let site_root = site_root.clone();
            async move {
                let Ok(url) = Url::parse(&item.url) else {
                    return VisitResult { outcome: PageOutcome::Failed, discovered: vec![] };
                };
                match http.get(url.as_str()).await {
                    Ok(response) => {
                        let links = discover_links(&response.body, &site_root);
                        VisitResult { outcome: PageOutcome::Completed, discovered: links }
                    }
                    Err(_) => VisitResult { outcome: PageOutcome::Failed, discovered: vec![] },
                }
            }
        })
        .await;

        self.wal
            .append(WalEventPayload::ScrapeResult { pending_urls: summary.completed.clone() })
            .await?;
        info!("scrape complete: {} pages, {} failed", summary.completed.len(), summary.failed.len());
        Ok(())
    }

    /// Discovers bundles on every scraped page, follows each bundle's
    /// source map (if any), and materialises the recovered sources (C3-C6).
    async fn run_extract(&self, site_root: &Url) -> Result<()> {
        let (state, _) = crate::wal::load_current_state(&self.config.output_root).await?;
        let mut manifests: Vec<BundleManifest> = Vec::new();
        let mut seen_bundles = std::collections::HashSet::new();

        for page_url in &state.pending_urls {
            let Ok(url) = Url::parse(page_url) else { continue };
            let Ok(response) = self.http.get(url.as_str()).await else { continue };
            let final_url = Url::parse(&response.final_url).unwrap_or(url);

            for bundle in discover_bundles(&response.body, &final_url) {
                if !seen_bundles.insert(bundle.url.clone()) {
                    continue;
                }
                if let Some(manifest) = self.extract_one_bundle(site_root, &bundle.url, bundle.kind).await {
                    self.wal
                        .append(WalEventPayload::ExtractBundle { bundle_name: manifest.bundle_url.clone() })
                        .await?;
                    manifests.push(manifest);
                }
            }
        }

        write_manifests_cache(&self.config.output_root, &manifests).await?;
        Ok(())
    }

    async fn extract_one_bundle(&self, site_root: &Url, bundle_url: &str, kind: BundleKind) -> Option<BundleManifest> {
        // C2: a prior run's fully-validated extraction result skips the
        // network round-trip and re-parse entirely on a hit.
        if let Some(cached) = cache::global().get::<crate::sourcemap::ExtractionResult>(Namespace::ExtractionResult, bundle_url)
        {
            let (manifest, errors) =
                reconstruct::materialize_bundle(&self.config.output_root, bundle_url, &cached.map_url, &cached.files).await;
            for e in &errors {
                warn!("extraction write failed: {e}");
            }
            return Some(manifest);
        }

        let bundle_response = self.http.get(bundle_url).await.ok()?;
        let bundle_url_parsed = Url::parse(bundle_url).ok()?;

        let discovered = sourcemap::discover(
            &self.http,
            &bundle_url_parsed,
            &bundle_response.headers,
            &bundle_response.body,
            kind == BundleKind::Stylesheet,
        )
        .await;

        let Some(discovered) = discovered else {
            let relative = crate::capture::local_path_for(site_root, &bundle_url_parsed);
            return write_verbatim_bundle(&self.config.output_root, bundle_url, &relative, &bundle_response.body)
                .await
                .ok();
        };

        let (map_text, map_url) = match (&discovered.inline_content, &discovered.url) {
            (Some(inline), _) => (inline.clone(), bundle_url.to_string()),
            (None, Some(map_url)) => {
                if let Some(cached_text) = cache::global().get::<String>(Namespace::RawMapText, map_url) {
                    (cached_text, map_url.clone())
                } else {
                    match self.http.get(map_url).await {
                        Ok(resp) => {
                            cache::global().set(Namespace::RawMapText, map_url, &resp.body);
                            (resp.body, map_url.clone())
                        }
                        Err(_) => return None,
                    }
                }
            }
            _ => return None,
        };

        let parsed = sourcemap::parse_and_validate(&map_text).ok()?;
        let extraction = sourcemap::extract(&parsed, bundle_url, &map_url);
        cache::global().set(Namespace::ExtractionResult, bundle_url, &extraction);

        let (manifest, errors) =
            reconstruct::materialize_bundle(&self.config.output_root, bundle_url, &map_url, &extraction.files).await;
        for e in &errors {
            warn!("extraction write failed: {e}");
        }
        Some(manifest)
    }

    async fn run_dependencies(&self) -> Result<()> {
        let manifests = read_manifests_cache(&self.config.output_root).await?;
        let all_paths: Vec<String> = manifests.iter().flat_map(|m| m.files.iter().map(|f| f.relative_path.clone())).collect();

        let groups = dependencies::group_by_package(&all_paths);
        let versions = dependencies::detect_versions(&groups, None, &VersionDetectionOptions::default());
        let entries = dependencies::build_package_entries(&groups, &versions, &[]);

        let import_aliases = BTreeMap::new();
        let bundler_alias_config = BTreeMap::new();
        let notes = vec!["dependency versions inferred from sourcemap/lockfile paths; unverifiable entries fall back to \"*\".".to_string()];

        manifest::write_package_json(
            &self.config.output_root,
            "reconstructed-app",
            &entries,
            &import_aliases,
            &bundler_alias_config,
            &notes,
        )
        .await?;

        let extracted_at = Utc::now().to_rfc3339();
        manifest::write_top_level_manifest(&self.config.output_root, &extracted_at, &self.config.target_url, Mode::Page, &manifests)
            .await?;
        Ok(())
    }

    /// Drives a `Page` through every completed crawl URL, recording each
    /// visit's fixtures/assets via `capture:page:started/completed/failed`.
    async fn run_capture(&self, site_root: &Url) -> Result<()> {
        let Some(factory) = &self.page_factory else {
            info!("no page factory configured; skipping capture phase");
            return Ok(());
        };

        let (state, _) = crate::wal::load_current_state(&self.config.output_root).await?;
        // Resume in-progress URLs left over from a crashed run, plus anything
        // still pending; already-completed URLs are skipped (idempotent re-run).
        let remaining: Vec<String> = state.pending_urls.iter().chain(state.in_progress_urls.iter()).cloned().collect();

        let mut all_fixtures = Vec::new();
        let mut all_assets: Vec<CapturedAsset> = Vec::new();
        let redirects: Vec<crate::types::RedirectEdge> = Vec::new();

        for url in remaining {
            self.wal.append(WalEventPayload::CapturePageStarted { url: url.clone() }).await?;

            let page = match factory.new_page().await {
                Ok(p) => p,
                Err(e) => {
                    self.wal
                        .append(WalEventPayload::CapturePageFailed { url: url.clone(), error: e.to_string() })
                        .await?;
                    continue;
                }
            };

            match capture::capture_page(
                page.as_ref(),
                &url,
                site_root,
                &self.config.output_root,
                &self.config.capture_options,
                &self.config.capture_limits,
            )
            .await
            {
                Ok(outcome) => {
                    all_fixtures.extend(outcome.fixtures.clone());
                    all_assets.extend(outcome.assets.clone());
                    self.wal
                        .append(WalEventPayload::CapturePageCompleted {
                            url: url.clone(),
                            fixtures: outcome.fixtures,
                            assets: outcome.assets,
                        })
                        .await?;
                    if !outcome.discovered_urls.is_empty() {
                        self.wal
                            .append(WalEventPayload::CaptureUrlsDiscovered { urls: outcome.discovered_urls })
                            .await?;
                    }
                }
                Err(e) => {
                    self.wal.append(WalEventPayload::CapturePageFailed { url: url.clone(), error: e.to_string() }).await?;
                }
            }
        }

        let static_opts = StaticOptions {
            enabled: !all_assets.is_empty(),
            entrypoint: "index.html".to_string(),
            asset_count: all_assets.len(),
            path_prefix: None,
        };

        manifest::server_manifest::write_server_tree(
            &self.config.output_root,
            "reconstructed-app",
            &self.config.target_url,
            &Utc::now().to_rfc3339(),
            &ServerOptions::default(),
            &all_fixtures,
            &static_opts,
            &redirects,
        )
        .await?;

        Ok(())
    }
}

/// Extracts `a[href]` link targets in document order, resolved against
/// `page_url` and filtered to the crawl's http(s) scope.
fn discover_links(html: &str, page_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector is valid");
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| page_url.join(href).ok())
        .collect()
}

async fn write_verbatim_bundle(output_root: &Path, bundle_url: &str, relative_path: &str, body: &str) -> Result<BundleManifest> {
    let target = output_root.join("_bundles").join(relative_path.trim_start_matches('/'));
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, body.as_bytes()).await?;
    Ok(BundleManifest { bundle_url: bundle_url.to_string(), map_url: String::new(), files: Vec::new() })
}

const MANIFEST_CACHE_FILE: &str = "_manifests_cache.json";

async fn write_manifests_cache(output_root: &Path, manifests: &[BundleManifest]) -> Result<()> {
    let serializable: Vec<serde_json::Value> = manifests
        .iter()
        .map(|m| {
            serde_json::json!({
                "bundleUrl": m.bundle_url,
                "mapUrl": m.map_url,
                "files": m.files.iter().map(|f| serde_json::json!({
                    "relativePath": f.relative_path,
                    "md5": f.md5,
                    "size": f.size,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    tokio::fs::write(output_root.join(MANIFEST_CACHE_FILE), serde_json::to_vec(&serializable)?).await?;
    Ok(())
}

async fn read_manifests_cache(output_root: &Path) -> Result<Vec<BundleManifest>> {
    let path = output_root.join(MANIFEST_CACHE_FILE);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ReconError::IoError(e)),
    };
    let raw: Vec<serde_json::Value> = serde_json::from_slice(&bytes)?;
    let manifests = raw
        .into_iter()
        .map(|v| BundleManifest {
            bundle_url: v["bundleUrl"].as_str().unwrap_or_default().to_string(),
            map_url: v["mapUrl"].as_str().unwrap_or_default().to_string(),
            files: v["files"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|f| reconstruct::WriteRecord {
                    relative_path: f["relativePath"].as_str().unwrap_or_default().to_string(),
                    outcome: reconstruct::WriteOutcome::Written,
                    md5: f["md5"].as_str().unwrap_or_default().to_string(),
                    size: f["size"].as_u64().unwrap_or(0) as usize,
                })
                .collect(),
        })
        .collect();
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_links_resolves_relative_hrefs() {
        let html = r#"<a href="/about">About</a><a href="https://other.com/x">External</a>"#;
        let base = Url::parse("https://example.com/").unwrap();
        let links = discover_links(html, &base);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].as_str(), "https://example.com/about");
    }
}
