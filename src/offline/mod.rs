//! Versioned offline response cache.
//!
//! Requests are classified by origin, path and accept type into one of four
//! strategies. Entries live in the key-value store under
//! `offline:<version>:<url>`; activating a version purges every other one.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::source::FetchError;
use crate::storage::{keys, load_json, save_json, SharedStore};

/// Shell assets cached by [`OfflineCache::precache`].
pub const SHELL_ASSETS: &[&str] = &["/", "/index.html"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub method: String,
    pub url: String,
    pub accept: Option<String>,
    /// Top-level page load.
    pub navigate: bool,
}

impl CacheRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            accept: None,
            navigate: false,
        }
    }

    pub fn navigation(url: impl Into<String>) -> Self {
        Self {
            navigate: true,
            accept: Some("text/html".to_string()),
            ..Self::get(url)
        }
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    fn wants_html(&self) -> bool {
        self.navigate
            || self
                .accept
                .as_deref()
                .map(|accept| accept.contains("text/html"))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Not handled: foreign origin or non-GET.
    Passthrough,
    /// API traffic, never cached.
    Bypass,
    NetworkFirst,
    CacheFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl OfflineResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedEntry {
    stored_at: i64,
    response: OfflineResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOrigin {
    Network,
    Cache,
    /// Cached `index.html` served for an uncached page.
    Shell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub response: OfflineResponse,
    pub origin: ResponseOrigin,
}

/// Transport used on cache misses and refreshes.
pub trait Network {
    fn get(&self, request: &CacheRequest) -> Result<OfflineResponse, FetchError>;
}

impl<F> Network for F
where
    F: Fn(&CacheRequest) -> Result<OfflineResponse, FetchError>,
{
    fn get(&self, request: &CacheRequest) -> Result<OfflineResponse, FetchError> {
        self(request)
    }
}

pub struct OfflineCache {
    store: SharedStore,
    origin: String,
    version: String,
    stale: Mutex<Vec<CacheRequest>>,
}

impl OfflineCache {
    pub fn new(store: SharedStore, origin: &str, version: &str) -> Self {
        Self {
            store,
            origin: origin.trim_end_matches('/').to_string(),
            version: version.to_string(),
            stale: Mutex::new(Vec::new()),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Absolute URL for a path on the cached origin.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.origin, path.trim_start_matches('/'))
    }

    pub fn classify(&self, request: &CacheRequest) -> Strategy {
        if !request.method.eq_ignore_ascii_case("GET") {
            return Strategy::Passthrough;
        }
        let Some(path) = self.same_origin_path(&request.url) else {
            return Strategy::Passthrough;
        };
        if path.starts_with("/api/") {
            return Strategy::Bypass;
        }
        if request.wants_html() {
            Strategy::NetworkFirst
        } else {
            Strategy::CacheFirst
        }
    }

    pub fn respond<N: Network + ?Sized>(
        &self,
        request: &CacheRequest,
        network: &N,
    ) -> Result<Served, FetchError> {
        match self.classify(request) {
            Strategy::Passthrough | Strategy::Bypass => Ok(Served {
                response: network.get(request)?,
                origin: ResponseOrigin::Network,
            }),
            Strategy::NetworkFirst => self.network_first(request, network),
            Strategy::CacheFirst => self.cache_first(request, network),
        }
    }

    fn network_first<N: Network + ?Sized>(
        &self,
        request: &CacheRequest,
        network: &N,
    ) -> Result<Served, FetchError> {
        match network.get(request) {
            Ok(response) => {
                self.put_logged(&request.url, &response);
                Ok(Served {
                    response,
                    origin: ResponseOrigin::Network,
                })
            }
            Err(err) => {
                tracing::debug!(?err, url = %request.url, "network failed, trying cache");
                if let Some(response) = self.lookup(&request.url) {
                    return Ok(Served {
                        response,
                        origin: ResponseOrigin::Cache,
                    });
                }
                match self.lookup(&self.shell_url()) {
                    Some(response) => Ok(Served {
                        response,
                        origin: ResponseOrigin::Shell,
                    }),
                    None => Err(err),
                }
            }
        }
    }

    fn cache_first<N: Network + ?Sized>(
        &self,
        request: &CacheRequest,
        network: &N,
    ) -> Result<Served, FetchError> {
        if let Some(response) = self.lookup(&request.url) {
            let mut stale = self.stale.lock();
            if !stale.iter().any(|queued| queued.url == request.url) {
                stale.push(request.clone());
            }
            return Ok(Served {
                response,
                origin: ResponseOrigin::Cache,
            });
        }
        let response = network.get(request)?;
        self.put_logged(&request.url, &response);
        Ok(Served {
            response,
            origin: ResponseOrigin::Network,
        })
    }

    pub fn pending_revalidations(&self) -> usize {
        self.stale.lock().len()
    }

    /// Refreshes entries served from cache since the last call. Returns how many were updated.
    pub fn revalidate_pending<N: Network + ?Sized>(&self, network: &N) -> usize {
        let pending = std::mem::take(&mut *self.stale.lock());
        let mut refreshed = 0;
        for request in pending {
            match network.get(&request) {
                Ok(response) if response.is_success() => {
                    self.put_logged(&request.url, &response);
                    refreshed += 1;
                }
                Ok(response) => {
                    tracing::debug!(status = response.status, url = %request.url, "revalidation skipped");
                }
                Err(err) => {
                    tracing::debug!(?err, url = %request.url, "revalidation failed");
                }
            }
        }
        refreshed
    }

    /// Caches the shell assets. Failures are ignored so a partial install still activates.
    pub fn precache<N: Network + ?Sized>(&self, network: &N) -> usize {
        let mut stored = 0;
        for asset in SHELL_ASSETS {
            let request = CacheRequest::get(format!("{}{}", self.origin, asset));
            match network.get(&request) {
                Ok(response) if response.is_success() => {
                    if self.put(&request.url, &response).is_ok() {
                        stored += 1;
                    }
                }
                Ok(response) => {
                    tracing::warn!(status = response.status, url = %request.url, "shell asset not cached");
                }
                Err(err) => {
                    tracing::warn!(?err, url = %request.url, "shell asset unavailable");
                }
            }
        }
        stored
    }

    /// Deletes entries of every other cache version. Returns how many were removed.
    pub fn activate(&self) -> Result<usize> {
        let own_prefix = self.prefix();
        let mut removed = 0;
        for key in self
            .store
            .keys_with_prefix(keys::OFFLINE_PREFIX)
            .context("listing offline cache entries")?
        {
            if key.starts_with(&own_prefix) {
                continue;
            }
            self.store
                .remove(&key)
                .with_context(|| format!("purging {key}"))?;
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(removed, version = %self.version, "purged stale offline cache entries");
        }
        Ok(removed)
    }

    /// URLs cached under the active version with their store time (unix seconds).
    pub fn entries(&self) -> Result<Vec<(String, i64)>> {
        let prefix = self.prefix();
        let mut out = Vec::new();
        for key in self.store.keys_with_prefix(&prefix)? {
            let Some(url) = key.strip_prefix(&prefix) else {
                continue;
            };
            if let Some(entry) = load_json::<CachedEntry>(&*self.store, &key)? {
                out.push((url.to_string(), entry.stored_at));
            }
        }
        Ok(out)
    }

    pub fn clear(&self) -> Result<usize> {
        let keys = self.store.keys_with_prefix(keys::OFFLINE_PREFIX)?;
        for key in &keys {
            self.store.remove(key)?;
        }
        Ok(keys.len())
    }

    pub fn lookup(&self, url: &str) -> Option<OfflineResponse> {
        match load_json::<CachedEntry>(&*self.store, &self.key_for(url)) {
            Ok(entry) => entry.map(|entry| entry.response),
            Err(err) => {
                tracing::warn!(?err, url, "unreadable offline cache entry");
                None
            }
        }
    }

    pub fn put(&self, url: &str, response: &OfflineResponse) -> Result<()> {
        let entry = CachedEntry {
            stored_at: OffsetDateTime::now_utc().unix_timestamp(),
            response: response.clone(),
        };
        save_json(&*self.store, &self.key_for(url), &entry)
    }

    fn put_logged(&self, url: &str, response: &OfflineResponse) {
        if let Err(err) = self.put(url, response) {
            tracing::warn!(?err, url, "failed to store offline copy");
        }
    }

    fn shell_url(&self) -> String {
        self.url_for("/index.html")
    }

    fn prefix(&self) -> String {
        format!("{}{}:", keys::OFFLINE_PREFIX, self.version)
    }

    fn key_for(&self, url: &str) -> String {
        format!("{}{}", self.prefix(), url)
    }

    fn same_origin_path<'a>(&self, url: &'a str) -> Option<&'a str> {
        let rest = url.strip_prefix(self.origin.as_str())?;
        if rest.is_empty() {
            return Some("/");
        }
        match rest.as_bytes()[0] {
            b'/' => Some(rest.split(['?', '#']).next().unwrap_or(rest)),
            b'?' | b'#' => Some("/"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KeyValueStore, MemoryStore};
    use std::cell::Cell;

    const ORIGIN: &str = "http://jobs.test";

    fn ok(body: &str) -> OfflineResponse {
        OfflineResponse {
            status: 200,
            content_type: Some("text/html".into()),
            body: body.into(),
        }
    }

    fn offline(_: &CacheRequest) -> Result<OfflineResponse, FetchError> {
        Err(FetchError::Network("offline".into()))
    }

    #[test]
    fn classifies_requests() {
        let cache = OfflineCache::new(MemoryStore::shared(), ORIGIN, "v1");
        assert_eq!(cache.classify(&CacheRequest::get("http://jobs.test/api/jobs")), Strategy::Bypass);
        assert_eq!(cache.classify(&CacheRequest::navigation("http://jobs.test/")), Strategy::NetworkFirst);
        assert_eq!(
            cache.classify(&CacheRequest::get("http://jobs.test/page").with_accept("text/html,*/*")),
            Strategy::NetworkFirst
        );
        assert_eq!(cache.classify(&CacheRequest::get("http://jobs.test/app.js?v=2")), Strategy::CacheFirst);
        assert_eq!(cache.classify(&CacheRequest::get("http://jobs.testing/app.js")), Strategy::Passthrough);
        assert_eq!(cache.classify(&CacheRequest::get("https://cdn.example/x.css")), Strategy::Passthrough);
        let mut post = CacheRequest::get("http://jobs.test/app.js");
        post.method = "POST".into();
        assert_eq!(cache.classify(&post), Strategy::Passthrough);
    }

    #[test]
    fn api_responses_are_never_stored() -> anyhow::Result<()> {
        let store = MemoryStore::shared();
        let cache = OfflineCache::new(store.clone(), ORIGIN, "v1");
        let served = cache.respond(&CacheRequest::get("http://jobs.test/api/jobs"), &|_: &CacheRequest| -> Result<OfflineResponse, FetchError> { Ok(ok("{}")) })?;
        assert_eq!(served.origin, ResponseOrigin::Network);
        assert!(store.keys_with_prefix(keys::OFFLINE_PREFIX)?.is_empty());
        assert!(cache
            .respond(&CacheRequest::get("http://jobs.test/api/jobs"), &offline)
            .is_err());
        Ok(())
    }

    #[test]
    fn network_first_falls_back_to_cache_then_shell() -> anyhow::Result<()> {
        let cache = OfflineCache::new(MemoryStore::shared(), ORIGIN, "v1");
        let page = CacheRequest::navigation("http://jobs.test/about");
        let served = cache.respond(&page, &|_: &CacheRequest| -> Result<OfflineResponse, FetchError> {
            Ok(ok("about v1"))
        })?;
        assert_eq!(served.origin, ResponseOrigin::Network);

        let served = cache.respond(&page, &offline)?;
        assert_eq!(served.origin, ResponseOrigin::Cache);
        assert_eq!(served.response.body, "about v1");

        let other = CacheRequest::navigation("http://jobs.test/other");
        assert!(cache.respond(&other, &offline).is_err());
        cache.put("http://jobs.test/index.html", &ok("shell"))?;
        let served = cache.respond(&other, &offline)?;
        assert_eq!(served.origin, ResponseOrigin::Shell);
        assert_eq!(served.response.body, "shell");
        Ok(())
    }

    #[test]
    fn cache_first_serves_stale_and_revalidates() -> anyhow::Result<()> {
        let cache = OfflineCache::new(MemoryStore::shared(), ORIGIN, "v1");
        let asset = CacheRequest::get("http://jobs.test/app.js");
        let calls = Cell::new(0);
        let network = |_: &CacheRequest| -> Result<OfflineResponse, FetchError> {
            calls.set(calls.get() + 1);
            Ok(ok(&format!("build {}", calls.get())))
        };
        assert_eq!(cache.respond(&asset, &network)?.response.body, "build 1");
        let served = cache.respond(&asset, &network)?;
        assert_eq!(served.origin, ResponseOrigin::Cache);
        assert_eq!(served.response.body, "build 1");
        cache.respond(&asset, &network)?;
        assert_eq!(cache.pending_revalidations(), 1);
        assert_eq!(calls.get(), 1);

        assert_eq!(cache.revalidate_pending(&network), 1);
        assert_eq!(cache.pending_revalidations(), 0);
        assert_eq!(cache.respond(&asset, &offline)?.response.body, "build 2");
        Ok(())
    }

    #[test]
    fn activation_purges_other_versions() -> anyhow::Result<()> {
        let store = MemoryStore::shared();
        let old = OfflineCache::new(store.clone(), ORIGIN, "v1");
        old.put("http://jobs.test/app.js", &ok("old"))?;
        store.set("bookmarks", "{}")?;

        let current = OfflineCache::new(store.clone(), ORIGIN, "v2");
        current.put("http://jobs.test/app.js", &ok("new"))?;
        assert_eq!(current.activate()?, 1);
        assert_eq!(old.lookup("http://jobs.test/app.js"), None);
        let entries = current.entries()?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "http://jobs.test/app.js");
        assert!(store.get("bookmarks")?.is_some());
        Ok(())
    }

    #[test]
    fn precache_tolerates_failures() {
        let cache = OfflineCache::new(MemoryStore::shared(), ORIGIN, "v1");
        let network = |request: &CacheRequest| -> Result<OfflineResponse, FetchError> {
            if request.url.ends_with("index.html") {
                Ok(ok("shell"))
            } else {
                Err(FetchError::Network("refused".into()))
            }
        };
        assert_eq!(cache.precache(&network), 1);
        assert_eq!(cache.lookup("http://jobs.test/index.html").map(|r| r.body), Some("shell".into()));
    }
}
