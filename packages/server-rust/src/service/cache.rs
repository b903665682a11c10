//! Per-backend tool catalog cache with a fixed TTL.
//!
//! Each backend's entry is replaced whole on a successful fetch and left
//! alone on a failed one. Concurrent misses for the same backend each fetch;
//! the last writer wins.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relay_core::Tool;
use tokio::time::Instant;
use tracing::debug;

use crate::backend::BackendHandle;

#[derive(Debug, Clone)]
struct CacheEntry {
    tools: Arc<[Tool]>,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct ToolCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ToolCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the backend's catalog, fetching it when the cached copy is
    /// missing or expired.
    ///
    /// # Errors
    ///
    /// Propagates the backend's fetch failure; any existing entry is kept.
    pub async fn get(&self, backend: &BackendHandle) -> anyhow::Result<Arc<[Tool]>> {
        let name = backend.name();
        if let Some(tools) = self.fresh(name) {
            metrics::counter!("relay_tool_cache_hits_total").increment(1);
            return Ok(tools);
        }
        metrics::counter!("relay_tool_cache_misses_total").increment(1);

        let tools: Arc<[Tool]> = backend.list_tools().await?.into();
        debug!(backend = name, tools = tools.len(), "tool catalog refreshed");
        self.entries.insert(
            name.to_string(),
            CacheEntry {
                tools: Arc::clone(&tools),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(tools)
    }

    /// The last cached catalog for `backend`, regardless of age. Never
    /// contacts the backend.
    #[must_use]
    pub fn peek(&self, backend: &str) -> Option<Arc<[Tool]>> {
        self.entries.get(backend).map(|e| Arc::clone(&e.tools))
    }

    /// Number of backends with a cached catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fresh(&self, backend: &str) -> Option<Arc<[Tool]>> {
        let entry = self.entries.get(backend)?;
        (Instant::now() < entry.expires_at).then(|| Arc::clone(&entry.tools))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{BackendHandle, ToolPolicy};
    use crate::test_support::MockBackend;

    const TTL: Duration = Duration::from_secs(60);

    fn handle(mock: &Arc<MockBackend>) -> BackendHandle {
        BackendHandle::new("files", Arc::clone(mock) as _, ToolPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_within_ttl_is_served_from_cache() {
        let mock = Arc::new(MockBackend::with_tools(&["read"]));
        let backend = handle(&mock);
        let cache = ToolCache::new(TTL);

        let first = cache.get(&backend).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        let second = cache.get(&backend).await.unwrap();

        assert_eq!(mock.list_calls(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let mock = Arc::new(MockBackend::with_tools(&["read"]));
        let backend = handle(&mock);
        let cache = ToolCache::new(TTL);

        cache.get(&backend).await.unwrap();
        mock.set_tools(&["read", "write"]);
        tokio::time::advance(TTL + Duration::from_millis(1)).await;

        let tools = cache.get(&backend).await.unwrap();
        assert_eq!(mock.list_calls(), 2);
        assert_eq!(tools.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_leaves_nothing_cached() {
        let mock = Arc::new(MockBackend::with_tools(&["read"]));
        mock.set_failing(true);
        let backend = handle(&mock);
        let cache = ToolCache::new(TTL);

        assert!(cache.get(&backend).await.is_err());
        assert!(cache.peek("files").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_entry() {
        let mock = Arc::new(MockBackend::with_tools(&["read"]));
        let backend = handle(&mock);
        let cache = ToolCache::new(TTL);

        cache.get(&backend).await.unwrap();
        tokio::time::advance(TTL * 2).await;
        mock.set_failing(true);

        assert!(cache.get(&backend).await.is_err());
        let stale = cache.peek("files").unwrap();
        assert_eq!(stale[0].name, "read");

        // Once the backend recovers the entry is replaced.
        mock.set_failing(false);
        mock.set_tools(&["write"]);
        assert_eq!(cache.get(&backend).await.unwrap()[0].name, "write");
    }

    #[tokio::test(start_paused = true)]
    async fn policy_is_applied_before_caching() {
        let mock = Arc::new(MockBackend::with_tools(&["read", "delete"]));
        let backend = BackendHandle::new(
            "files",
            Arc::clone(&mock) as _,
            ToolPolicy {
                allow: vec!["read".to_string()],
                deny: vec![],
            },
        );
        let cache = ToolCache::new(TTL);

        let tools = cache.get(&backend).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "read");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_gets_are_safe() {
        let mock = Arc::new(MockBackend::with_tools(&["read", "write"]));
        let backend = Arc::new(handle(&mock));
        let cache = Arc::new(ToolCache::new(TTL));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let cache = Arc::clone(&cache);
            let backend = Arc::clone(&backend);
            tasks.spawn(async move { cache.get(&backend).await.map(|t| t.len()) });
        }
        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap().unwrap(), 2);
        }

        // No single-flight: between 1 and 32 fetches, but one entry.
        assert!((1..=32).contains(&mock.list_calls()));
        assert_eq!(cache.len(), 1);
    }
}
