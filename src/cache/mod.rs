//! Namespaced content-addressed cache (C2, spec §4.2): four independent
//! namespaces, no TTL, last-writer-wins, process-wide disable flag. Read
//! and write failures (e.g. a poisoned serialization) degrade silently to
//! a cache miss rather than propagating an error — caching is an
//! optimisation, never a correctness dependency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Full page scrape results (HTML + discovered bundle refs).
    PageScrape,
    /// Whether a bundle has a source map and where it was found.
    BundleMapVerdict,
    /// Raw, unparsed source map text, keyed by its own URL or content hash.
    RawMapText,
    /// Fully extracted+validated `ExtractionResult`, keyed by bundle URL.
    ExtractionResult,
}

/// Hashes arbitrary bytes into a stable cache key. Using content hashes
/// (rather than raw URLs) means two different-looking requests that
/// resolve to identical content collapse to one cache entry.
pub fn content_key(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

#[derive(Debug)]
struct Inner {
    store: DashMap<(Namespace, String), String>,
    enabled: AtomicBool,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
    writes: std::sync::atomic::AtomicU64,
}

/// Cheaply cloneable handle; all clones share the same underlying map.
#[derive(Debug, Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                store: DashMap::new(),
                enabled: AtomicBool::new(true),
                hits: std::sync::atomic::AtomicU64::new(0),
                misses: std::sync::atomic::AtomicU64::new(0),
                writes: std::sync::atomic::AtomicU64::new(0),
            }),
        }
    }

    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::Relaxed);
    }

    pub fn enable(&self) {
        self.inner.enabled.store(true, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            writes: self.inner.writes.load(Ordering::Relaxed),
        }
    }

    fn get_raw(&self, ns: Namespace, key: &str) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let found = self.inner.store.get(&(ns, key.to_string())).map(|v| v.clone());
        if found.is_some() {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    fn set_raw(&self, ns: Namespace, key: &str, value: String) {
        if !self.is_enabled() {
            return;
        }
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
        // Last-writer-wins: plain insert, no compare-and-swap.
        self.inner.store.insert((ns, key.to_string()), value);
    }

    /// Typed get: deserialization failure is treated as a miss, never an
    /// error, per this cache's "never a correctness dependency" contract.
    pub fn get<T: DeserializeOwned>(&self, ns: Namespace, key: &str) -> Option<T> {
        let raw = self.get_raw(ns, key)?;
        serde_json::from_str(&raw).ok()
    }

    /// Typed set: a serialization failure is swallowed (logged at debug in
    /// callers if they care) rather than propagated, same reasoning as get.
    pub fn set<T: Serialize>(&self, ns: Namespace, key: &str, value: &T) {
        if let Ok(serialized) = serde_json::to_string(value) {
            self.set_raw(ns, key, serialized);
        }
    }

    pub fn contains(&self, ns: Namespace, key: &str) -> bool {
        self.is_enabled() && self.inner.store.contains_key(&(ns, key.to_string()))
    }

    pub fn clear(&self) {
        self.inner.store.clear();
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<Cache> = OnceLock::new();

/// The process-wide cache instance every component shares. One `Cache` per
/// process, per spec §4.2 ("process-wide disable switch"); a single
/// `OnceLock` gives every call site the same handle without threading an
/// `Arc<Cache>` through every constructor.
pub fn global() -> &'static Cache {
    GLOBAL.get_or_init(Cache::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let cache = Cache::new();
        cache.set(Namespace::RawMapText, "abc", &"hello".to_string());
        let value: Option<String> = cache.get(Namespace::RawMapText, "abc");
        assert_eq!(value, Some("hello".to_string()));
    }

    #[test]
    fn namespaces_do_not_collide() {
        let cache = Cache::new();
        cache.set(Namespace::RawMapText, "key", &"a".to_string());
        cache.set(Namespace::ExtractionResult, "key", &"b".to_string());
        let a: Option<String> = cache.get(Namespace::RawMapText, "key");
        let b: Option<String> = cache.get(Namespace::ExtractionResult, "key");
        assert_eq!(a, Some("a".to_string()));
        assert_eq!(b, Some("b".to_string()));
    }

    #[test]
    fn disabled_cache_always_misses() {
        let cache = Cache::new();
        cache.set(Namespace::PageScrape, "k", &"v".to_string());
        cache.disable();
        let value: Option<String> = cache.get(Namespace::PageScrape, "k");
        assert_eq!(value, None);
    }

    #[test]
    fn last_writer_wins() {
        let cache = Cache::new();
        cache.set(Namespace::BundleMapVerdict, "k", &"first".to_string());
        cache.set(Namespace::BundleMapVerdict, "k", &"second".to_string());
        let value: Option<String> = cache.get(Namespace::BundleMapVerdict, "k");
        assert_eq!(value, Some("second".to_string()));
    }

    #[test]
    fn content_key_is_stable() {
        assert_eq!(content_key(b"hello"), content_key(b"hello"));
        assert_ne!(content_key(b"hello"), content_key(b"world"));
    }
}
