//! # Invalidating Cache
//!
//! Process-wide `(family, key) → value` map in front of every upstream read.
//!
//! ## Guarantees
//!
//! - **Single-flight**: concurrent misses for one key share one loader call.
//!   The in-flight table keeps only a weak handle, so once every waiter is
//!   gone the load is dropped and nothing is inserted.
//! - **Generations**: each family carries a counter bumped on invalidation.
//!   A load that started before an invalidation still answers its waiters
//!   but never populates the cache.
//! - **Bounded**: global entry capacity with least-recently-used eviction,
//!   plus a per-family TTL.
//! - **Retries**: transient upstream errors are retried with exponential
//!   backoff before surfacing as `upstream_unavailable`.
//!
//! ## List Keys
//!
//! Keys starting with [`LIST_KEY`] hold whole-family listings. Invalidating
//! any single key of a family also drops that family's listings.

use crate::upstream::UpstreamError;
use device_selection_core::SelectionError;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, WeakShared};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Prefix of keys that hold a listing of the whole family.
pub const LIST_KEY: &str = "*";

// =============================================================================
// FAMILIES
// =============================================================================

/// Groups of cache entries that are invalidated together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    DeviceTypes,
    Devices,
    Aspects,
    Functions,
    Concepts,
    DeviceGroups,
    ImportTypes,
    Imports,
    Permissions,
}

impl Family {
    pub const ALL: [Family; 9] = [
        Family::DeviceTypes,
        Family::Devices,
        Family::Aspects,
        Family::Functions,
        Family::Concepts,
        Family::DeviceGroups,
        Family::ImportTypes,
        Family::Imports,
        Family::Permissions,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceTypes => "device-types",
            Self::Devices => "devices",
            Self::Aspects => "aspects",
            Self::Functions => "functions",
            Self::Concepts => "concepts",
            Self::DeviceGroups => "device-groups",
            Self::ImportTypes => "import-types",
            Self::Imports => "imports",
            Self::Permissions => "permissions",
        }
    }

    /// Families whose keys embed a bearer token.
    #[must_use]
    pub fn is_token_scoped(self) -> bool {
        matches!(self, Self::Permissions | Self::ImportTypes | Self::Imports)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown cache family '{}'", s))
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
    pub family_ttl: HashMap<Family, Duration>,
    /// Total tries per load, first call included.
    pub retry_attempts: u32,
    pub retry_base: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(60),
            family_ttl: HashMap::new(),
            retry_attempts: 3,
            retry_base: Duration::from_millis(100),
        }
    }
}

impl CacheConfig {
    fn ttl_of(&self, family: Family) -> Duration {
        self.family_ttl.get(&family).copied().unwrap_or(self.ttl)
    }
}

// =============================================================================
// CACHE
// =============================================================================

type CacheKey = (Family, String);

/// The key as it may appear in logs and error bodies.
fn shown(key: &CacheKey) -> &str {
    if key.0.is_token_scoped() {
        "<token>"
    } else {
        &key.1
    }
}

type Value = Arc<dyn Any + Send + Sync>;
type Load = BoxFuture<'static, Result<Value, SelectionError>>;

struct Entry {
    value: Value,
    inserted: Instant,
    last_access: AtomicU64,
}

struct InFlight {
    id: u64,
    handle: WeakShared<Load>,
}

struct Inner {
    config: CacheConfig,
    entries: RwLock<HashMap<CacheKey, Entry>>,
    inflight: Mutex<HashMap<CacheKey, InFlight>>,
    generations: Mutex<HashMap<Family, u64>>,
    tick: AtomicU64,
    next_load: AtomicU64,
}

/// Shared handle to the cache. Clones see the same entries.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl Cache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                entries: RwLock::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                generations: Mutex::new(HashMap::new()),
                tick: AtomicU64::new(0),
                next_load: AtomicU64::new(0),
            }),
        }
    }

    /// Return the cached value for `(family, key)` or load it.
    ///
    /// Concurrent callers for the same key await one shared load. The loader
    /// may be called more than once when transient errors are retried.
    pub async fn get<T, F, Fut>(
        &self,
        family: Family,
        key: impl Into<String>,
        loader: F,
    ) -> Result<Arc<T>, SelectionError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        let key: CacheKey = (family, key.into());
        if let Some(value) = self.lookup(&key) {
            return downcast(value, &key);
        }

        let shared = {
            let mut inflight = self.inner.inflight.lock();
            if let Some(value) = self.lookup(&key) {
                return downcast(value, &key);
            }
            match inflight.get(&key).and_then(|f| f.handle.upgrade()) {
                Some(shared) => shared,
                None => {
                    let id = self.inner.next_load.fetch_add(1, Ordering::Relaxed);
                    let shared: Shared<Load> = self
                        .clone()
                        .load(key.clone(), id, loader)
                        .boxed()
                        .shared();
                    if let Some(handle) = shared.downgrade() {
                        inflight.insert(key.clone(), InFlight { id, handle });
                    }
                    shared
                }
            }
        };

        let value = shared.await?;
        downcast(value, &key)
    }

    async fn load<T, F, Fut>(self, key: CacheKey, id: u64, loader: F) -> Result<Value, SelectionError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        let generation = self.generation(key.0);
        let result = self.load_with_retry(&key, &loader).await;

        {
            let mut inflight = self.inner.inflight.lock();
            if inflight.get(&key).is_some_and(|f| f.id == id) {
                inflight.remove(&key);
            }
        }

        let value: Value = Arc::new(result?);
        if self.generation(key.0) == generation {
            self.insert(key, value.clone());
        } else {
            tracing::debug!(
                event = "cache_stale_load",
                family = %key.0,
                key = shown(&key),
                "Discarding load that raced an invalidation"
            );
        }
        Ok(value)
    }

    async fn load_with_retry<T, F, Fut>(&self, key: &CacheKey, loader: &F) -> Result<T, SelectionError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let attempts = self.inner.config.retry_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            match loader().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self
                        .inner
                        .config
                        .retry_base
                        .saturating_mul(2u32.saturating_pow(attempt));
                    tracing::warn!(
                        event = "upstream_retry",
                        family = %key.0,
                        key = shown(key),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying upstream read"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into_selection(key.0.as_str(), shown(key))),
            }
        }
    }

    fn generation(&self, family: Family) -> u64 {
        self.inner
            .generations
            .lock()
            .get(&family)
            .copied()
            .unwrap_or(0)
    }

    fn touch(&self) -> u64 {
        self.inner.tick.fetch_add(1, Ordering::Relaxed)
    }

    fn lookup(&self, key: &CacheKey) -> Option<Value> {
        let ttl = self.inner.config.ttl_of(key.0);
        {
            let entries = self.inner.entries.read();
            let entry = entries.get(key)?;
            if entry.inserted.elapsed() < ttl {
                entry.last_access.store(self.touch(), Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        let mut entries = self.inner.entries.write();
        if entries.get(key).is_some_and(|e| e.inserted.elapsed() >= ttl) {
            entries.remove(key);
        }
        None
    }

    fn insert(&self, key: CacheKey, value: Value) {
        let capacity = self.inner.config.capacity.max(1);
        let mut entries = self.inner.entries.write();
        entries.insert(
            key,
            Entry {
                value,
                inserted: Instant::now(),
                last_access: AtomicU64::new(self.touch()),
            },
        );
        while entries.len() > capacity {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            entries.remove(&oldest);
            tracing::debug!(
                event = "cache_evict",
                family = %oldest.0,
                key = shown(&oldest),
                "Evicted least recently used entry"
            );
        }
    }

    /// Drop one key (and the family's listings), or the whole family when
    /// `key` is `None`. In-flight loads of the family will not populate.
    pub fn invalidate(&self, family: Family, key: Option<&str>) {
        *self.inner.generations.lock().entry(family).or_insert(0) += 1;

        let matches = |k: &CacheKey| {
            k.0 == family
                && match key {
                    None => true,
                    Some(key) => k.1 == key || k.1.starts_with(LIST_KEY),
                }
        };
        let removed = {
            let mut entries = self.inner.entries.write();
            let before = entries.len();
            entries.retain(|k, _| !matches(k));
            before - entries.len()
        };
        self.inner.inflight.lock().retain(|k, _| !matches(k));

        tracing::info!(
            event = "cache_invalidate",
            family = %family,
            key = if family.is_token_scoped() {
                "<token>"
            } else {
                key.unwrap_or(LIST_KEY)
            },
            removed,
            "Cache invalidated"
        );
    }

    /// Drop every entry of the given families.
    pub fn flush(&self, families: &[Family]) {
        for family in families {
            self.invalidate(*family, None);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, family: Family, key: &str) -> bool {
        self.inner
            .entries
            .read()
            .contains_key(&(family, key.to_string()))
    }
}

fn downcast<T: Send + Sync + 'static>(value: Value, key: &CacheKey) -> Result<Arc<T>, SelectionError> {
    value.downcast::<T>().map_err(|_| {
        SelectionError::Internal(format!(
            "cache entry {}/{} holds an unexpected type",
            key.0,
            shown(key)
        ))
    })
}

// =============================================================================
// TESTS
// =============================================================================
