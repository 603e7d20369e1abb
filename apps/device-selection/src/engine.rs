//! # Selection Engine
//!
//! Async orchestration of the core engine: loads what a request needs
//! through the catalog, applies permissions, and hands the data to the pure
//! selection and group usability functions.
//!
//! Every operation runs under the request deadline. Expiry drops all
//! outstanding upstream loads and surfaces as `cancelled`.

use crate::catalog::{Catalog, Snapshot};
use crate::upstream::{DeviceFilter, ResourceKind};
use device_selection_core::group_usability::group_criteria;
use device_selection_core::primitives::MAX_GROUP_DEVICE_IDS;
use device_selection_core::selection::{
    filter_device_types, select_device_variants, select_groups, select_imports,
};
use device_selection_core::service_group::{apply_modifier, restrict_device, virtual_devices};
use device_selection_core::{
    Device, DeviceGroup, DeviceGroupFilterCriterion, DeviceType, FilterCriterion,
    GroupHelperResult, Selectable, SelectionError, SelectionOptions, finalize, group_helper,
    idmodifier, validate_criteria,
};
use futures::{StreamExt, TryStreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct Engine {
    catalog: Arc<Catalog>,
    timeout: Duration,
    max_parallel: usize,
}

impl Engine {
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, timeout: Duration, max_parallel: usize) -> Self {
        Self {
            catalog,
            timeout,
            max_parallel: max_parallel.max(1),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    async fn with_deadline<T, Fut>(&self, operation: &'static str, fut: Fut) -> Result<T, SelectionError>
    where
        Fut: Future<Output = Result<T, SelectionError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    event = "request_timeout",
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Request deadline exceeded"
                );
                Err(SelectionError::Cancelled)
            }
        }
    }

    // =========================================================================
    // SELECTABLES
    // =========================================================================

    /// Devices, groups and imports satisfying every criterion.
    pub async fn selectables(
        &self,
        token: &str,
        criteria: &[FilterCriterion],
        options: &SelectionOptions,
    ) -> Result<Vec<Selectable>, SelectionError> {
        self.with_deadline("selectables", self.selectables_inner(token, criteria, options))
            .await
    }

    async fn selectables_inner(
        &self,
        token: &str,
        criteria: &[FilterCriterion],
        options: &SelectionOptions,
    ) -> Result<Vec<Selectable>, SelectionError> {
        validate_criteria(criteria)?;
        let snapshot = self.catalog.snapshot().await?;

        let mut out = Vec::new();
        if options.include_devices {
            out.extend(self.select_devices(&snapshot, token, criteria, options).await?);
        }
        if options.include_groups {
            let groups = self.readable_groups(token).await?;
            out.extend(select_groups(&snapshot.ctx(), &groups, criteria));
        }
        if options.include_imports {
            let (import_types, imports) = tokio::try_join!(
                self.catalog.import_types(token),
                self.catalog.imports(token)
            )?;
            out.extend(select_imports(
                &snapshot.ctx(),
                &import_types,
                &imports,
                criteria,
                options,
            ));
        }

        let out = finalize(out);
        tracing::debug!(
            event = "selection_done",
            criteria = criteria.len(),
            selectables = out.len(),
            "Selection finished"
        );
        Ok(out)
    }

    async fn select_devices(
        &self,
        snapshot: &Snapshot,
        token: &str,
        criteria: &[FilterCriterion],
        options: &SelectionOptions,
    ) -> Result<Vec<Selectable>, SelectionError> {
        let filter = DeviceFilter {
            criteria: criteria.to_vec(),
            ids: options.with_device_ids.as_ref().map(|ids| {
                ids.iter()
                    .map(|id| idmodifier::strip(id).to_string())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            }),
        };
        let (readable, devices) = tokio::try_join!(
            self.catalog.readable(token, ResourceKind::Devices),
            self.catalog.devices(&filter)
        )?;
        let candidates: Vec<&Device> = devices
            .iter()
            .filter(|d| readable.contains(&d.id) && options.allows_device(d))
            .collect();
        let types = self
            .load_device_types(candidates.iter().map(|d| d.device_type_id.clone()))
            .await?;

        let ctx = snapshot.ctx();
        Ok(candidates
            .into_iter()
            .filter_map(|device| {
                types
                    .get(&device.device_type_id)
                    .map(|dt| select_device_variants(&ctx, device, dt, criteria, options))
            })
            .flatten()
            .collect())
    }

    /// Fetch the distinct device types, at most `max_parallel` at a time.
    ///
    /// Types the repository does not know are left out, so devices pointing
    /// at them are skipped.
    async fn load_device_types<I>(
        &self,
        ids: I,
    ) -> Result<BTreeMap<String, Arc<DeviceType>>, SelectionError>
    where
        I: IntoIterator<Item = String>,
    {
        let unique: BTreeSet<String> = ids.into_iter().collect();
        let catalog = &self.catalog;
        futures::stream::iter(unique)
            .map(|id| async move {
                let found = catalog.find_device_type(&id).await?;
                Ok::<_, SelectionError>((id, found))
            })
            .buffer_unordered(self.max_parallel)
            .try_filter_map(|(id, found)| async move {
                if found.is_none() {
                    tracing::warn!(
                        event = "device_type_missing",
                        device_type_id = %id,
                        "Skipping devices of unknown device type"
                    );
                }
                Ok::<_, SelectionError>(found.map(|device_type| (id, device_type)))
            })
            .try_collect()
            .await
    }

    async fn readable_groups(&self, token: &str) -> Result<Vec<DeviceGroup>, SelectionError> {
        let (readable, groups) = tokio::try_join!(
            self.catalog.readable(token, ResourceKind::DeviceGroups),
            self.catalog.device_groups()
        )?;
        Ok(groups
            .iter()
            .filter(|g| readable.contains(&g.id))
            .cloned()
            .collect())
    }

    // =========================================================================
    // DEVICE GROUPS
    // =========================================================================

    /// Criteria every listed device (base or virtual) can serve.
    pub async fn device_group_criteria(
        &self,
        token: &str,
        device_ids: &[String],
    ) -> Result<Vec<DeviceGroupFilterCriterion>, SelectionError> {
        self.with_deadline("device_group_criteria", async {
            if device_ids.is_empty() {
                return Err(SelectionError::BadRequest("device ids must not be empty".into()));
            }
            let snapshot = self.catalog.snapshot().await?;
            let members = self.load_members(token, device_ids).await?;
            Ok(group_criteria(&snapshot.ctx(), members.iter().map(|(_, dt)| dt))
                .into_iter()
                .collect())
        })
        .await
    }

    /// Current group criteria and the effect of adding each readable device.
    pub async fn group_helper(
        &self,
        token: &str,
        device_ids: &[String],
        maintains_usability: bool,
    ) -> Result<GroupHelperResult, SelectionError> {
        self.with_deadline("group_helper", async {
            let snapshot = self.catalog.snapshot().await?;
            let members = self.load_members(token, device_ids).await?;
            let candidates = self.load_candidates(token).await?;
            Ok(group_helper(
                &snapshot.ctx(),
                &members,
                &candidates,
                maintains_usability,
            ))
        })
        .await
    }

    /// Resolve ids (possibly id-modified) to devices with their effective
    /// types. Each id needs read permission on its base device.
    async fn load_members(
        &self,
        token: &str,
        device_ids: &[String],
    ) -> Result<Vec<(Device, DeviceType)>, SelectionError> {
        if device_ids.len() > MAX_GROUP_DEVICE_IDS {
            return Err(SelectionError::BadRequest(format!(
                "too many device ids: {} (max {})",
                device_ids.len(),
                MAX_GROUP_DEVICE_IDS
            )));
        }
        let lookups: Vec<_> = device_ids.iter().map(|id| self.load_member(token, id)).collect();
        futures::stream::iter(lookups)
            .buffered(self.max_parallel)
            .try_collect()
            .await
    }

    async fn load_member(&self, token: &str, id: &str) -> Result<(Device, DeviceType), SelectionError> {
        let (base, params) = idmodifier::parse(id)?;
        if !self.catalog.check(token, ResourceKind::Devices, &base).await? {
            return Err(SelectionError::Forbidden(format!("device '{}'", base)));
        }
        let device = self.catalog.device(&base).await?;
        let device_type = self.catalog.device_type(&device.device_type_id).await?;
        let effective = apply_modifier(&device_type, &params)?;
        let device = match idmodifier::service_group_selection(&params) {
            Some(key) => restrict_device(&device, &device_type, key).ok_or_else(|| {
                SelectionError::BadRequest(format!("device '{}' has no service group '{}'", base, key))
            })?,
            None => (*device).clone(),
        };
        Ok((device, effective))
    }

    /// Every readable device plus its service-group variants.
    async fn load_candidates(&self, token: &str) -> Result<Vec<(Device, DeviceType)>, SelectionError> {
        let all_devices = DeviceFilter::default();
        let (readable, devices) = tokio::try_join!(
            self.catalog.readable(token, ResourceKind::Devices),
            self.catalog.devices(&all_devices)
        )?;
        let devices: Vec<&Device> = devices.iter().filter(|d| readable.contains(&d.id)).collect();
        let types = self
            .load_device_types(devices.iter().map(|d| d.device_type_id.clone()))
            .await?;

        let mut out = Vec::new();
        for device in devices {
            if let Some(dt) = types.get(&device.device_type_id) {
                out.push((device.clone(), (**dt).clone()));
                out.extend(virtual_devices(device, dt));
            }
        }
        Ok(out)
    }

    // =========================================================================
    // DEVICE TYPES
    // =========================================================================

    /// Device types (and with `include_id_modified` their service-group
    /// variants) satisfying the criteria. Empty criteria keep every type.
    pub async fn device_types(
        &self,
        criteria: &[FilterCriterion],
        options: &SelectionOptions,
    ) -> Result<Vec<DeviceType>, SelectionError> {
        self.with_deadline("device_types", async {
            let snapshot = self.catalog.snapshot().await?;
            let device_types = self.catalog.device_types().await?;
            Ok(filter_device_types(
                &snapshot.ctx(),
                &device_types,
                criteria,
                options,
            ))
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
    use crate::cache::{Cache, CacheConfig};
    use crate::upstream::Upstream;
    use crate::upstream::memory::{Fixtures, Grant, MemoryUpstream};

    fn engine(fixtures: Fixtures, timeout: Duration) -> Engine {
        let memory = Arc::new(MemoryUpstream::new(fixtures));
        let catalog = Catalog::new(
            Upstream::from_single(memory),
            Cache::new(CacheConfig::default()),
            4,
        );
        Engine::new(Arc::new(catalog), timeout, 4)
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_maps_to_cancelled() {
        let engine = engine(Fixtures::default(), Duration::from_millis(50));
        let result: Result<(), _> = engine
            .with_deadline("test", std::future::pending())
            .await;
        assert_eq!(result, Err(SelectionError::Cancelled));
    }

    #[tokio::test]
    async fn empty_criteria_are_rejected() {
        let engine = engine(Fixtures::default(), Duration::from_secs(5));
        let result = engine
            .selectables("t", &[], &SelectionOptions::default())
            .await;
        assert_eq!(result.map_err(|e| e.kind()), Err("bad_request"));
    }

    #[tokio::test]
    async fn devices_of_unknown_types_are_skipped() {
        use device_selection_core::primitives::MEASURING_FUNCTION_PREFIX;
        use device_selection_core::{Content, ContentVariable, Function, Interaction, Service};

        let get_temp = format!("{}getTemperature", MEASURING_FUNCTION_PREFIX);
        let device = |id: &str, type_id: &str| Device {
            id: id.into(),
            name: id.into(),
            device_type_id: type_id.into(),
            ..Device::default()
        };
        let fixtures = Fixtures {
            functions: vec![Function {
                id: get_temp.clone(),
                ..Function::default()
            }],
            device_types: vec![DeviceType {
                id: "t1".into(),
                services: vec![Service {
                    id: "s1".into(),
                    local_id: "s1".into(),
                    name: "Get Temperature".into(),
                    interaction: Interaction::Request,
                    protocol_id: String::new(),
                    service_group_key: String::new(),
                    inputs: vec![],
                    outputs: vec![Content {
                        content_variable: ContentVariable {
                            name: "temperature".into(),
                            function_id: get_temp.clone(),
                            ..ContentVariable::default()
                        },
                        ..Content::default()
                    }],
                }],
                ..DeviceType::default()
            }],
            devices: vec![device("d1", "t1"), device("orphan", "gone")],
            ..Fixtures::default()
        };
        let engine = engine(fixtures, Duration::from_secs(5));

        let selected = engine
            .selectables(
                "t",
                &[FilterCriterion::new(get_temp)],
                &SelectionOptions::default(),
            )
            .await
            .expect("selection");
        let ids: Vec<&str> = selected.iter().map(Selectable::id).collect();
        assert_eq!(ids, vec!["d1"]);
    }

    #[tokio::test]
    async fn group_criteria_need_ids_and_permission() {
        let mut fixtures = Fixtures {
            devices: vec![Device {
                id: "d1".into(),
                device_type_id: "t1".into(),
                ..Device::default()
            }],
            device_types: vec![DeviceType {
                id: "t1".into(),
                ..DeviceType::default()
            }],
            ..Fixtures::default()
        };
        fixtures.grants.insert("alice".into(), Grant::default());
        let engine = engine(fixtures, Duration::from_secs(5));

        let empty = engine.device_group_criteria("alice", &[]).await;
        assert_eq!(empty.map_err(|e| e.kind()), Err("bad_request"));

        let denied = engine.device_group_criteria("alice", &["d1".to_string()]).await;
        assert_eq!(denied.map_err(|e| e.kind()), Err("forbidden"));

        let stranger = engine.device_group_criteria("bob", &["d1".to_string()]).await;
        assert_eq!(stranger.map_err(|e| e.kind()), Err("unauthorized"));
    }
}
