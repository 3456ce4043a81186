//! Bounded BFS crawl queue + worker pool (C8, spec §4.8): `pending` /
//! `inProgress` / `completed` URL sets, `maxPages`/`maxDepth` bounds, a
//! same-origin-plus-subdomain-extension scope test, retry budget per page,
//! and cooperative cancellation tied to one root signal (spec §5, §9
//! "any language's async or thread-pool facility suffices").
//!
//! Grounded in `discovery/browser_capture.rs::capture_multiple`'s bounded,
//! restart-capable worker pool and the BFS/scope pattern of the pack's
//! `sitebookify` crawler (`CrawlScope`, `HashMap`+`VecDeque`).

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::types::CrawlItem;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub max_pages: usize,
    pub max_depth: u32,
    pub concurrency: usize,
    pub page_retries: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 200,
            max_depth: 5,
            concurrency: 5,
            page_retries: 1,
        }
    }
}

/// Same-site subdomain prefixes admitted in addition to exact-origin
/// matches (spec §4.8: "same-site extension admits specific subdomains").
const SAME_SITE_SUBDOMAIN_PREFIXES: &[&str] = &["www.", "cdn.", "static.", "assets.", "images.", "media."];

/// Normalises a URL to its BFS identity: scheme+host+path with default
/// ports stripped, the fragment removed, and a canonical (no trailing
/// slash unless root) path. Query strings are kept — two URLs differing
/// only by query are distinct pages for crawl purposes.
pub fn normalize_url(url: &Url) -> String {
    let scheme = url.scheme();
    let host = url.host_str().unwrap_or("");
    let is_default_port = matches!((scheme, url.port()), ("http", Some(80)) | ("https", Some(443)) | (_, None));
    let port = if is_default_port { String::new() } else { format!(":{}", url.port().unwrap()) };
    let mut path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();
    format!("{scheme}://{host}{port}{path}{query}")
}

/// Registrable root of a host for the "specific subdomains" extension —
/// strips a recognised prefix so `cdn.example.com` and `example.com` are
/// judged same-site.
fn strip_known_subdomain(host: &str) -> &str {
    for prefix in SAME_SITE_SUBDOMAIN_PREFIXES {
        if let Some(rest) = host.strip_prefix(prefix) {
            return rest;
        }
    }
    host
}

/// Whether `candidate` is in-scope for a crawl rooted at `base_origin`:
/// exact origin match, or a recognised same-site subdomain over https/http.
pub fn is_in_scope(base: &Url, candidate: &Url) -> bool {
    if candidate.scheme() != "http" && candidate.scheme() != "https" {
        return false;
    }
    let (Some(base_host), Some(cand_host)) = (base.host_str(), candidate.host_str()) else {
        return false;
    };
    if base.origin() == candidate.origin() {
        return true;
    }
    strip_known_subdomain(base_host) == strip_known_subdomain(cand_host)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Completed,
    Failed,
}

/// What a single page visit reported back to the queue: its outcome plus
/// any new same-origin URLs discovered while processing it.
pub struct VisitResult {
    pub outcome: PageOutcome,
    pub discovered: Vec<Url>,
}

struct QueueState {
    pending: VecDeque<CrawlItem>,
    in_progress: HashSet<String>,
    completed: HashSet<String>,
    visited: HashSet<String>,
    failed: HashSet<String>,
    retry_counts: HashMap<String, u32>,
}

/// Shared, lockable crawl queue. Cloned cheaply; all clones share state.
///
/// `notify` wakes workers parked in `pop()` whenever `pending` gains an item
/// or `in_progress` shrinks — without it, a momentarily-empty `pending`
/// (e.g. right after the single seed URL is popped, before it has produced
/// any children) would look indistinguishable from "no more work ever", and
/// every worker but the one holding the seed would exit immediately,
/// collapsing `concurrency` down to a single effective worker.
#[derive(Clone)]
pub struct CrawlQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    base: Url,
    config: CrawlConfig,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub visited_count: usize,
}

impl CrawlQueue {
    pub fn new(seed: Url, config: CrawlConfig) -> Self {
        let key = normalize_url(&seed);
        let mut pending = VecDeque::new();
        pending.push_back(CrawlItem { url: key.clone(), depth: 0 });
        let mut visited = HashSet::new();
        visited.insert(key);

        Self {
            state: Arc::new(Mutex::new(QueueState {
                pending,
                in_progress: HashSet::new(),
                completed: HashSet::new(),
                visited,
                failed: HashSet::new(),
                retry_counts: HashMap::new(),
            })),
            notify: Arc::new(Notify::new()),
            base: seed,
            config,
        }
    }

    /// Pops the next item, or waits for one. Returns `None` only when the
    /// crawl is genuinely finished: either `max_pages` is reached, or
    /// `pending` is empty *and* no worker is still `in_progress` (so no
    /// further items can ever be discovered). A momentarily-empty `pending`
    /// while other workers are still in flight parks on `notify` instead of
    /// terminating, so all `concurrency` workers stay alive for the whole
    /// crawl rather than exiting the first time they race the seed worker.
    async fn pop(&self) -> Option<CrawlItem> {
        loop {
            // Constructed before re-checking state so a concurrent
            // `notify_waiters()` from `mark_completed`/`mark_failed` can
            // never land in the gap between the check and the wait —
            // `Notify::notified()` snapshots the notification state at
            // construction time, not at first poll.
            let notified = self.notify.notified();

            {
                let mut state = self.state.lock().await;
                if state.completed.len() >= self.config.max_pages {
                    return None;
                }
                if let Some(item) = state.pending.pop_front() {
                    state.in_progress.insert(item.url.clone());
                    return Some(item);
                }
                if state.in_progress.is_empty() {
                    // Nothing pending, nothing in flight to discover more: done.
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Invariant I5: a completed URL is removed from in-progress and never
    /// re-enters pending. Always wakes parked workers afterwards: even with
    /// no newly discovered URLs, shrinking `in_progress` can be exactly what
    /// lets an idle worker's `pop()` conclude the crawl is finished.
    async fn mark_completed(&self, item: &CrawlItem, discovered: Vec<Url>) {
        {
            let mut state = self.state.lock().await;
            state.in_progress.remove(&item.url);
            state.completed.insert(item.url.clone());
            state.failed.remove(&item.url);

            if item.depth < self.config.max_depth {
                for url in discovered {
                    if !is_in_scope(&self.base, &url) {
                        continue;
                    }
                    let key = normalize_url(&url);
                    if state.visited.contains(&key) {
                        continue;
                    }
                    state.visited.insert(key.clone());
                    state.pending.push_back(CrawlItem { url: key, depth: item.depth + 1 });
                }
            }
        }
        self.notify.notify_waiters();
    }

    async fn mark_failed(&self, item: &CrawlItem) {
        {
            let mut state = self.state.lock().await;
            state.in_progress.remove(&item.url);
            let retries = state.retry_counts.entry(item.url.clone()).or_insert(0);
            if *retries < self.config.page_retries {
                *retries += 1;
                let depth = item.depth;
                let url = item.url.clone();
                trace!("requeueing {url} (attempt {})", *retries + 1);
                state.pending.push_back(CrawlItem { url, depth });
            } else {
                warn!("giving up on {} after {} attempt(s)", item.url, *retries + 1);
                state.failed.insert(item.url.clone());
            }
        }
        self.notify.notify_waiters();
    }

    pub async fn summary(&self) -> CrawlSummary {
        let state = self.state.lock().await;
        CrawlSummary {
            completed: state.completed.iter().cloned().collect(),
            failed: state.failed.iter().cloned().collect(),
            visited_count: state.visited.len(),
        }
    }
}

/// Runs the bounded BFS crawl: `config.concurrency` workers pop items from
/// `queue`, invoke `visit` for each, and feed discovered URLs back in. A
/// single `cancel` token stops every worker cooperatively — in-flight work
/// finishes its current step, then the worker exits without popping again.
pub async fn run<F, Fut>(queue: CrawlQueue, cancel: CancellationToken, visit: F) -> CrawlSummary
where
    F: Fn(CrawlItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = VisitResult> + Send,
{
    let visit = Arc::new(visit);
    let mut workers = Vec::new();

    for worker_id in 0..queue.config.concurrency {
        let queue = queue.clone();
        let cancel = cancel.clone();
        let visit = visit.clone();

        workers.push(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    debug!("crawl worker {worker_id} stopping: cancelled");
                    break;
                }
                let popped = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    popped = queue.pop() => popped,
                };
                let Some(item) = popped else {
                    break;
                };

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        queue.mark_failed(&item).await;
                        break;
                    }
                    result = visit(item.clone()) => result,
                };

                match result.outcome {
                    PageOutcome::Completed => queue.mark_completed(&item, result.discovered).await,
                    PageOutcome::Failed => queue.mark_failed(&item).await,
                }
            }
        }));
    }

    for worker in workers {
        let _ = worker.await;
    }

    queue.summary().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_fragment_and_default_port() {
        let url = Url::parse("https://example.com:443/a/b/#frag").unwrap();
        assert_eq!(normalize_url(&url), "https://example.com/a/b");
    }

    #[test]
    fn normalize_keeps_non_default_port() {
        let url = Url::parse("http://example.com:8080/x").unwrap();
        assert_eq!(normalize_url(&url), "http://example.com:8080/x");
    }

    #[test]
    fn same_origin_is_in_scope() {
        let base = Url::parse("https://example.com/").unwrap();
        let candidate = Url::parse("https://example.com/about").unwrap();
        assert!(is_in_scope(&base, &candidate));
    }

    #[test]
    fn recognised_subdomain_is_in_scope() {
        let base = Url::parse("https://example.com/").unwrap();
        let candidate = Url::parse("https://cdn.example.com/a.js").unwrap();
        assert!(is_in_scope(&base, &candidate));
    }

    #[test]
    fn unrelated_origin_is_out_of_scope() {
        let base = Url::parse("https://example.com/").unwrap();
        let candidate = Url::parse("https://evil.com/").unwrap();
        assert!(!is_in_scope(&base, &candidate));
    }

    #[tokio::test]
    async fn bfs_respects_max_pages() {
        let seed = Url::parse("https://example.com/").unwrap();
        let config = CrawlConfig { max_pages: 2, max_depth: 5, concurrency: 1, page_retries: 0 };
        let queue = CrawlQueue::new(seed, config);
        let cancel = CancellationToken::new();

        let summary = run(queue, cancel, |item| async move {
            let next = Url::parse(&format!("{}/next-{}", item.url, item.depth)).unwrap();
            VisitResult { outcome: PageOutcome::Completed, discovered: vec![next] }
        })
        .await;

        assert!(summary.completed.len() <= 2);
    }

    #[tokio::test]
    async fn idle_workers_wait_for_in_flight_siblings_instead_of_exiting() {
        // Regression test: with concurrency > 1 and a single seed URL, the
        // worker that pops the seed is briefly the only one with anything to
        // do. Other workers must park until it reports children rather than
        // seeing an empty `pending` and exiting for good.
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let seed = Url::parse("https://example.com/").unwrap();
        let config = CrawlConfig { max_pages: 4, max_depth: 5, concurrency: 3, page_retries: 0 };
        let queue = CrawlQueue::new(seed, config);
        let cancel = CancellationToken::new();
        let visited = Arc::new(AtomicUsize::new(0));

        let visited_clone = visited.clone();
        let summary = run(queue, cancel, move |item| {
            let visited = visited_clone.clone();
            async move {
                visited.fetch_add(1, Ordering::SeqCst);
                if item.depth == 0 {
                    // Give the other two workers a chance to call `pop()`
                    // and find `pending` empty before this one reports its
                    // children.
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let children = vec![
                        Url::parse("https://example.com/a").unwrap(),
                        Url::parse("https://example.com/b").unwrap(),
                        Url::parse("https://example.com/c").unwrap(),
                    ];
                    VisitResult { outcome: PageOutcome::Completed, discovered: children }
                } else {
                    VisitResult { outcome: PageOutcome::Completed, discovered: vec![] }
                }
            }
        })
        .await;

        assert_eq!(visited.load(Ordering::SeqCst), 4);
        assert_eq!(summary.completed.len(), 4);
    }

    #[tokio::test]
    async fn failed_page_is_retried_then_given_up() {
        let seed = Url::parse("https://example.com/").unwrap();
        let config = CrawlConfig { max_pages: 10, max_depth: 5, concurrency: 1, page_retries: 1 };
        let queue = CrawlQueue::new(seed, config);
        let cancel = CancellationToken::new();

        let summary = run(queue, cancel, |_item| async move {
            VisitResult { outcome: PageOutcome::Failed, discovered: vec![] }
        })
        .await;

        assert_eq!(summary.failed.len(), 1);
        assert!(summary.completed.is_empty());
    }
}
