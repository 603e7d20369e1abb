//! # Catalog
//!
//! Cached, permit-bounded reads of the upstream catalog, plus the immutable
//! index snapshot (aspect forest, function/concept index) the matcher runs
//! against.
//!
//! ## Snapshots
//!
//! Requests take an `Arc<Snapshot>` once and keep it for their lifetime.
//! An invalidation of aspects, functions or concepts starts a background
//! rebuild; readers keep the previous snapshot until the new one is
//! swapped in. A rebuild started before a later invalidation is discarded.

use crate::cache::{Cache, Family, LIST_KEY};
use crate::invalidation::InvalidationEvent;
use crate::upstream::{Action, DeviceFilter, ResourceKind, Upstream, UpstreamError};
use device_selection_core::{
    Aspect, AspectIndex, Concept, Device, DeviceGroup, DeviceType, Function, FunctionIndex,
    Import, ImportType, MatchContext, SelectionError,
};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;

/// Immutable indexes for one request.
pub struct Snapshot {
    pub aspects: AspectIndex,
    pub functions: FunctionIndex,
}

impl Snapshot {
    #[must_use]
    pub fn ctx(&self) -> MatchContext<'_> {
        MatchContext::new(&self.aspects, &self.functions)
    }
}

const SNAPSHOT_FAMILIES: [Family; 3] = [Family::Aspects, Family::Functions, Family::Concepts];

// =============================================================================
// CATALOG
// =============================================================================

pub struct Catalog {
    upstream: Upstream,
    cache: Cache,
    permits: Arc<Semaphore>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    epoch: AtomicU64,
}

impl Catalog {
    /// `max_parallel` bounds concurrent upstream calls across all requests.
    #[must_use]
    pub fn new(upstream: Upstream, cache: Cache, max_parallel: usize) -> Self {
        Self {
            upstream,
            cache,
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
            snapshot: RwLock::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// The current index snapshot, built on first use.
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>, SelectionError> {
        if let Some(snapshot) = self.snapshot.read().clone() {
            return Ok(snapshot);
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        let snapshot = Arc::new(self.build_snapshot().await?);
        self.swap_snapshot(epoch, snapshot.clone());
        Ok(snapshot)
    }

    async fn build_snapshot(&self) -> Result<Snapshot, SelectionError> {
        let (aspects, functions, concepts) =
            tokio::try_join!(self.aspects(), self.functions(), self.concepts())?;
        Ok(Snapshot {
            aspects: AspectIndex::build(&aspects),
            functions: FunctionIndex::build(&functions, &concepts),
        })
    }

    fn swap_snapshot(&self, epoch: u64, snapshot: Arc<Snapshot>) {
        let mut slot = self.snapshot.write();
        if self.epoch.load(Ordering::SeqCst) == epoch {
            *slot = Some(snapshot);
        }
    }

    fn rebuild_snapshot(self: &Arc<Self>) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let catalog = Arc::clone(self);
        tokio::spawn(async move {
            match catalog.build_snapshot().await {
                Ok(snapshot) => {
                    catalog.swap_snapshot(epoch, Arc::new(snapshot));
                    tracing::info!(event = "snapshot_rebuilt", epoch, "Index snapshot rebuilt");
                }
                Err(e) => {
                    // Next reader rebuilds and reports the failure.
                    let mut slot = catalog.snapshot.write();
                    if catalog.epoch.load(Ordering::SeqCst) == epoch {
                        *slot = None;
                    }
                    tracing::warn!(
                        event = "snapshot_rebuild_failed",
                        epoch,
                        error = %e,
                        "Index snapshot rebuild failed"
                    );
                }
            }
        });
    }

    // -------------------------------------------------------------------------
    // Invalidation
    // -------------------------------------------------------------------------

    /// Drop the entries named by `event` and refresh the snapshot if needed.
    pub fn apply_invalidation(self: &Arc<Self>, event: &InvalidationEvent) {
        let families = event.families();
        if families.is_empty() {
            tracing::debug!(
                event = "invalidation_ignored",
                topic = %event.topic,
                "No cache family for topic"
            );
            return;
        }
        for family in &families {
            // Token-scoped entries are keyed by token, never by resource id.
            let key = if family.is_token_scoped() {
                None
            } else {
                event.key.as_deref()
            };
            self.cache.invalidate(*family, key);
        }
        if families.iter().any(|f| SNAPSHOT_FAMILIES.contains(f)) {
            self.rebuild_snapshot();
        }
    }

    /// Drop every family and rebuild the snapshot.
    pub fn flush_all(self: &Arc<Self>) {
        self.cache.flush(&Family::ALL);
        self.rebuild_snapshot();
    }

    // -------------------------------------------------------------------------
    // Cached reads
    // -------------------------------------------------------------------------

    /// Cache `call` under `(family, key)`; the upstream call holds a permit.
    async fn cached<T, F, Fut>(
        &self,
        family: Family,
        key: String,
        call: F,
    ) -> Result<Arc<T>, SelectionError>
    where
        T: Send + Sync + 'static,
        F: Fn(Upstream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        let upstream = self.upstream.clone();
        let permits = Arc::clone(&self.permits);
        self.cache
            .get(family, key, move || {
                let permits = Arc::clone(&permits);
                let pending = call(upstream.clone());
                async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| UpstreamError::Fatal("upstream permits closed".into()))?;
                    pending.await
                }
            })
            .await
    }

    pub async fn aspects(&self) -> Result<Arc<Vec<Aspect>>, SelectionError> {
        self.cached(Family::Aspects, LIST_KEY.into(), |u| async move {
            u.devices.list_aspects().await
        })
        .await
    }

    pub async fn functions(&self) -> Result<Arc<Vec<Function>>, SelectionError> {
        self.cached(Family::Functions, LIST_KEY.into(), |u| async move {
            u.devices.list_functions().await
        })
        .await
    }

    pub async fn concepts(&self) -> Result<Arc<Vec<Concept>>, SelectionError> {
        self.cached(Family::Concepts, LIST_KEY.into(), |u| async move {
            u.devices.list_concepts().await
        })
        .await
    }

    pub async fn device_type(&self, id: &str) -> Result<Arc<DeviceType>, SelectionError> {
        self.find_device_type(id)
            .await?
            .ok_or_else(|| SelectionError::BadRequest(format!("unknown device type '{}'", id)))
    }

    /// Like [`Catalog::device_type`], but an id the repository does not know
    /// is `None` instead of an error. The miss is cached like a hit.
    pub async fn find_device_type(
        &self,
        id: &str,
    ) -> Result<Option<Arc<DeviceType>>, SelectionError> {
        let owned = id.to_string();
        let found = self
            .cached(Family::DeviceTypes, id.to_string(), move |u| {
                let id = owned.clone();
                async move {
                    match u.devices.device_type(&id).await {
                        Ok(device_type) => Ok(Some(Arc::new(device_type))),
                        Err(UpstreamError::NotFound(_)) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        Ok(found.as_ref().clone())
    }

    pub async fn device_types(&self) -> Result<Arc<Vec<DeviceType>>, SelectionError> {
        self.cached(Family::DeviceTypes, LIST_KEY.into(), |u| async move {
            u.devices.list_device_types().await
        })
        .await
    }

    pub async fn device(&self, id: &str) -> Result<Arc<Device>, SelectionError> {
        let owned = id.to_string();
        self.cached(Family::Devices, id.to_string(), move |u| {
            let id = owned.clone();
            async move { u.devices.device(&id).await }
        })
        .await
    }

    /// Broad-recall device listing, cached per filter.
    pub async fn devices(&self, filter: &DeviceFilter) -> Result<Arc<Vec<Device>>, SelectionError> {
        let encoded = serde_json::to_string(filter)
            .map_err(|e| SelectionError::Internal(format!("device filter: {}", e)))?;
        let owned = filter.clone();
        self.cached(Family::Devices, format!("{}{}", LIST_KEY, encoded), move |u| {
            let filter = owned.clone();
            async move { u.devices.list_devices(&filter).await }
        })
        .await
    }

    pub async fn device_groups(&self) -> Result<Arc<Vec<DeviceGroup>>, SelectionError> {
        self.cached(Family::DeviceGroups, LIST_KEY.into(), |u| async move {
            u.devices.list_device_groups().await
        })
        .await
    }

    /// Ids of `kind` the token may read.
    pub async fn readable(
        &self,
        token: &str,
        kind: ResourceKind,
    ) -> Result<Arc<BTreeSet<String>>, SelectionError> {
        let owned = token.to_string();
        self.cached(Family::Permissions, format!("{}:{}", kind, token), move |u| {
            let token = owned.clone();
            async move {
                let ids = u.permissions.list_readable(&token, kind).await?;
                Ok(ids.into_iter().collect::<BTreeSet<String>>())
            }
        })
        .await
    }

    /// Whether the token may read `id`.
    pub async fn check(
        &self,
        token: &str,
        kind: ResourceKind,
        id: &str,
    ) -> Result<bool, SelectionError> {
        let (owned_token, owned_id) = (token.to_string(), id.to_string());
        let allowed = self
            .cached(
                Family::Permissions,
                format!("{}:{}:{}", kind, id, token),
                move |u| {
                    let (token, id) = (owned_token.clone(), owned_id.clone());
                    async move {
                        u.permissions
                            .check(&token, kind, &id, Action::Read)
                            .await
                    }
                },
            )
            .await?;
        Ok(*allowed)
    }

    pub async fn import_types(&self, token: &str) -> Result<Arc<Vec<ImportType>>, SelectionError> {
        let owned = token.to_string();
        self.cached(Family::ImportTypes, format!("{}{}", LIST_KEY, token), move |u| {
            let token = owned.clone();
            async move { u.imports.list_import_types(&token).await }
        })
        .await
    }

    pub async fn imports(&self, token: &str) -> Result<Arc<Vec<Import>>, SelectionError> {
        let owned = token.to_string();
        self.cached(Family::Imports, format!("{}{}", LIST_KEY, token), move |u| {
            let token = owned.clone();
            async move { u.imports.list_imports(&token).await }
        })
        .await
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::upstream::memory::{Fixtures, Grant, MemoryUpstream};
    use std::time::Duration;

    fn catalog(fixtures: Fixtures) -> (Arc<Catalog>, Arc<MemoryUpstream>) {
        let memory = Arc::new(MemoryUpstream::new(fixtures));
        let catalog = Catalog::new(
            Upstream::from_single(Arc::clone(&memory)),
            Cache::new(CacheConfig::default()),
            4,
        );
        (Arc::new(catalog), memory)
    }

    fn aspects(ids: &[&str]) -> Vec<Aspect> {
        ids.iter().map(|id| Aspect::new(*id, *id)).collect()
    }

    #[tokio::test]
    async fn reads_are_cached() {
        let (catalog, memory) = catalog(Fixtures {
            aspects: aspects(&["air"]),
            ..Fixtures::default()
        });
        assert!(catalog.aspects().await.is_ok());
        assert!(catalog.aspects().await.is_ok());
        assert_eq!(memory.calls("list_aspects"), 1);
    }

    #[tokio::test]
    async fn invalidation_swaps_in_a_fresh_snapshot() {
        let (catalog, memory) = catalog(Fixtures {
            aspects: aspects(&["air"]),
            ..Fixtures::default()
        });
        let first = catalog.snapshot().await.expect("snapshot");
        assert!(first.aspects.contains("air"));

        memory.update(|f| f.aspects = aspects(&["air", "water"]));
        catalog.apply_invalidation(&InvalidationEvent::new("aspects", None));

        let mut fresh = catalog.snapshot().await.expect("snapshot");
        for _ in 0..100 {
            if fresh.aspects.contains("water") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            fresh = catalog.snapshot().await.expect("snapshot");
        }
        assert!(fresh.aspects.contains("water"));
        assert!(!first.aspects.contains("water"));
    }

    #[tokio::test]
    async fn permissions_are_cached_per_token() {
        let (catalog, memory) = catalog(Fixtures {
            devices: vec![Device {
                id: "d1".into(),
                ..Device::default()
            }],
            ..Fixtures::default()
        });
        assert!(catalog.check("t1", ResourceKind::Devices, "d1").await.expect("check"));
        assert!(!catalog.check("t1", ResourceKind::Devices, "d2").await.expect("check"));
        assert!(catalog.check("t1", ResourceKind::Devices, "d1").await.expect("check"));
        assert_eq!(memory.calls("check"), 2);

        let readable = catalog
            .readable("t2", ResourceKind::Devices)
            .await
            .expect("readable");
        assert!(readable.contains("d1"));
    }

    #[tokio::test]
    async fn unknown_device_type_is_a_bad_request() {
        let (catalog, _) = catalog(Fixtures::default());
        let err = catalog.device_type("missing").await.err();
        assert_eq!(err.map(|e| e.kind()), Some("bad_request"));

        let found = catalog.find_device_type("missing").await.expect("lookup");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn keyed_permissions_event_drops_every_token() {
        let grant = |ids: &[&str]| Grant {
            devices: ids.iter().map(|id| id.to_string()).collect(),
            ..Grant::default()
        };
        let mut fixtures = Fixtures::default();
        fixtures.grants.insert("t1".into(), grant(&["d1"]));
        let (catalog, memory) = catalog(fixtures);

        let before = catalog
            .readable("t1", ResourceKind::Devices)
            .await
            .expect("readable");
        assert!(!before.contains("d2"));

        memory.update(|f| {
            f.grants.insert("t1".into(), grant(&["d1", "d2"]));
        });
        catalog.apply_invalidation(&InvalidationEvent::new("permissions", Some("d2".into())));

        let after = catalog
            .readable("t1", ResourceKind::Devices)
            .await
            .expect("readable");
        assert!(after.contains("d2"));
        assert_eq!(memory.calls("list_readable"), 2);
    }
}
