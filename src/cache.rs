//! # Processor Cache
//!
//! Advisory key/value storage processors use for cross-page hints. Entries are
//! scoped through [`NamespacedCache`] to `(tenant, platform)`, to a single
//! integration (`int-{integration_id}`) or to the whole deployment
//! (`int-global`). A missing entry may only ever cause redundant work, never
//! an incorrect result.
//!
//! Counters ([`IntegrationCache::increment`]) back the request limiters in
//! [`crate::orchestration::limiter`].

use crate::error::{IntegrationStreamError, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Cache operations backing processor cache handles
#[async_trait]
pub trait IntegrationCache: Send + Sync {
    /// `Ok(None)` on miss or expiry
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically add `delta` to the integer stored at `key` and return the
    /// new value. A missing or expired counter starts at zero and expires
    /// `ttl` after creation. Counters never go below zero.
    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64>;

    fn provider_name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local TTL cache. Expired entries are dropped lazily on read.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IntegrationCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Ok(Some(entry.value.clone())),
            Some(_) => None,
            None => return Ok(None),
        };
        self.entries.remove(key);
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().expires_at > now => {
                let entry = occupied.get_mut();
                let current: i64 = entry.value.parse().map_err(|_| {
                    IntegrationStreamError::ValidationError(format!(
                        "cache entry {key} does not hold a counter"
                    ))
                })?;
                let next = current.saturating_add(delta).max(0);
                entry.value = next.to_string();
                Ok(next)
            }
            Entry::Occupied(mut expired) => {
                let next = delta.max(0);
                expired.insert(CacheEntry {
                    value: next.to_string(),
                    expires_at: now + ttl,
                });
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                let next = delta.max(0);
                vacant.insert(CacheEntry {
                    value: next.to_string(),
                    expires_at: now + ttl,
                });
                Ok(next)
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

/// Cache handle handed to a processor, prefixing every key with
/// `int-{tenant}-{platform}`
///
/// ```rust
/// use integration_stream::cache::{MemoryCache, NamespacedCache};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use uuid::Uuid;
///
/// # tokio_test::block_on(async {
/// let shared = Arc::new(MemoryCache::new());
/// let slack = NamespacedCache::new(shared.clone(), Uuid::new_v4(), "slack", Duration::from_secs(60));
/// let github = NamespacedCache::new(shared, Uuid::new_v4(), "github", Duration::from_secs(60));
///
/// slack.set("cursor", "page-2").await.unwrap();
/// assert_eq!(slack.get("cursor").await.unwrap().as_deref(), Some("page-2"));
/// assert_eq!(github.get("cursor").await.unwrap(), None);
/// # });
/// ```
#[derive(Clone)]
pub struct NamespacedCache {
    inner: Arc<dyn IntegrationCache>,
    namespace: String,
    default_ttl: Duration,
}

impl std::fmt::Debug for NamespacedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespacedCache")
            .field("provider", &self.inner.provider_name())
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl NamespacedCache {
    pub fn new(
        inner: Arc<dyn IntegrationCache>,
        tenant_id: Uuid,
        platform: &str,
        default_ttl: Duration,
    ) -> Self {
        Self::with_namespace(inner, format!("int-{tenant_id}-{platform}"), default_ttl)
    }

    /// Shared by every tenant and platform
    pub fn global(inner: Arc<dyn IntegrationCache>, default_ttl: Duration) -> Self {
        Self::with_namespace(inner, "int-global", default_ttl)
    }

    /// Private to one integration
    pub fn for_integration(
        inner: Arc<dyn IntegrationCache>,
        integration_id: Uuid,
        default_ttl: Duration,
    ) -> Self {
        Self::with_namespace(inner, format!("int-{integration_id}"), default_ttl)
    }

    pub fn with_namespace(
        inner: Arc<dyn IntegrationCache>,
        namespace: impl Into<String>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            inner,
            namespace: namespace.into(),
            default_ttl,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(&self.key(key)).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(&self.key(key), value, self.default_ttl).await
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.inner.set(&self.key(key), value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(&self.key(key)).await
    }

    pub async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        self.inner.increment(&self.key(key), delta, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_namespaces_do_not_collide() {
        let backend: Arc<dyn IntegrationCache> = Arc::new(MemoryCache::new());
        let tenant = Uuid::new_v4();
        let discord = NamespacedCache::new(backend.clone(), tenant, "discord", Duration::from_secs(60));
        let slack = NamespacedCache::new(backend, tenant, "slack", Duration::from_secs(60));

        discord.set("cursor", "abc").await.unwrap();

        assert_eq!(discord.get("cursor").await.unwrap().as_deref(), Some("abc"));
        assert_eq!(slack.get("cursor").await.unwrap(), None);
        assert_eq!(discord.namespace(), format!("int-{tenant}-discord"));
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_millis(0)).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_ttl_overrides_default() {
        let backend = Arc::new(MemoryCache::new());
        let cache = NamespacedCache::new(backend, Uuid::new_v4(), "github", Duration::from_secs(60));
        cache.set_with_ttl("etag", "W/1", Duration::ZERO).await.unwrap();
        cache.set("page", "3").await.unwrap();

        assert_eq!(cache.get("etag").await.unwrap(), None);
        assert_eq!(cache.get("page").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_global_and_integration_namespaces() {
        let backend: Arc<dyn IntegrationCache> = Arc::new(MemoryCache::new());
        let integration_id = Uuid::new_v4();
        let global = NamespacedCache::global(backend.clone(), Duration::from_secs(60));
        let scoped =
            NamespacedCache::for_integration(backend.clone(), integration_id, Duration::from_secs(60));
        let other = NamespacedCache::for_integration(backend, Uuid::new_v4(), Duration::from_secs(60));

        scoped.set("token", "t1").await.unwrap();

        assert_eq!(global.namespace(), "int-global");
        assert_eq!(scoped.namespace(), format!("int-{integration_id}"));
        assert_eq!(other.get("token").await.unwrap(), None);
        assert_eq!(global.get("token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_counter_floors_at_zero_and_expires() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);

        assert_eq!(cache.increment("c", 1, ttl).await.unwrap(), 1);
        assert_eq!(cache.increment("c", 2, ttl).await.unwrap(), 3);
        assert_eq!(cache.increment("c", -5, ttl).await.unwrap(), 0);
        assert_eq!(cache.increment("missing", -1, ttl).await.unwrap(), 0);

        cache.increment("window", 4, Duration::ZERO).await.unwrap();
        assert_eq!(cache.increment("window", 1, ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_counter_values() {
        let cache = MemoryCache::new();
        cache.set("k", "cursor", Duration::from_secs(60)).await.unwrap();

        let err = cache.increment("k", 1, Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, IntegrationStreamError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(60)).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
