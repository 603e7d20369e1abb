//! # In-Memory Upstream
//!
//! Serves a catalog snapshot from memory. Used by the integration tests and
//! by the `check` CLI command. Calls are counted per method and transient
//! failures can be injected, so cache behavior is observable.

use super::{
    Action, DeviceFilter, DeviceRepository, ImportRepository, PermissionOracle, ResourceKind,
    UpstreamError,
};
use async_trait::async_trait;
use device_selection_core::{
    Aspect, Concept, ContentVariable, Device, DeviceGroup, DeviceType, Function, Import,
    ImportType,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What one token may read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Grant {
    pub devices: Vec<String>,
    pub device_groups: Vec<String>,
    pub imports: Vec<String>,
}

impl Grant {
    fn ids(&self, kind: ResourceKind) -> &[String] {
        match kind {
            ResourceKind::Devices => &self.devices,
            ResourceKind::DeviceGroups => &self.device_groups,
            ResourceKind::Imports => &self.imports,
        }
    }
}

/// A complete catalog snapshot, as stored in a fixtures file.
///
/// Without `grants` every token reads everything. With grants, unknown
/// tokens are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixtures {
    pub aspects: Vec<Aspect>,
    pub functions: Vec<Function>,
    pub concepts: Vec<Concept>,
    pub device_types: Vec<DeviceType>,
    pub devices: Vec<Device>,
    pub device_groups: Vec<DeviceGroup>,
    pub import_types: Vec<ImportType>,
    pub imports: Vec<Import>,
    pub grants: BTreeMap<String, Grant>,
}

/// In-memory implementation of every upstream trait.
#[derive(Default)]
pub struct MemoryUpstream {
    fixtures: RwLock<Fixtures>,
    calls: Mutex<BTreeMap<&'static str, usize>>,
    failures: Mutex<usize>,
}

impl MemoryUpstream {
    #[must_use]
    pub fn new(fixtures: Fixtures) -> Self {
        Self {
            fixtures: RwLock::new(fixtures),
            ..Self::default()
        }
    }

    /// Edit the catalog in place. Callers publish the matching invalidation.
    pub fn update<F: FnOnce(&mut Fixtures)>(&self, edit: F) {
        edit(&mut self.fixtures.write());
    }

    /// Number of calls made to `method` so far.
    #[must_use]
    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    /// Make the next `n` calls fail transiently.
    pub fn fail_next(&self, n: usize) {
        *self.failures.lock() = n;
    }

    fn enter(&self, method: &'static str) -> Result<(), UpstreamError> {
        *self.calls.lock().entry(method).or_insert(0) += 1;
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(UpstreamError::Transient(format!("injected failure in {}", method)));
        }
        Ok(())
    }

    fn grant(&self, token: &str) -> Result<Option<Grant>, UpstreamError> {
        let fixtures = self.fixtures.read();
        if fixtures.grants.is_empty() {
            return Ok(None);
        }
        fixtures
            .grants
            .get(token)
            .cloned()
            .map(Some)
            .ok_or(UpstreamError::Unauthorized)
    }

    fn all_ids(&self, kind: ResourceKind) -> Vec<String> {
        let fixtures = self.fixtures.read();
        match kind {
            ResourceKind::Devices => fixtures.devices.iter().map(|d| d.id.clone()).collect(),
            ResourceKind::DeviceGroups => {
                fixtures.device_groups.iter().map(|g| g.id.clone()).collect()
            }
            ResourceKind::Imports => fixtures.imports.iter().map(|i| i.id.clone()).collect(),
        }
    }
}

fn mentions_function(variable: &ContentVariable, function_ids: &[String]) -> bool {
    function_ids.contains(&variable.function_id)
        || variable
            .sub_content_variables
            .iter()
            .any(|v| mentions_function(v, function_ids))
}

fn type_mentions(device_type: &DeviceType, function_ids: &[String]) -> bool {
    device_type.services.iter().any(|s| {
        s.inputs
            .iter()
            .chain(&s.outputs)
            .any(|c| mentions_function(&c.content_variable, function_ids))
    })
}

#[async_trait]
impl DeviceRepository for MemoryUpstream {
    /// Devices whose type is missing from the fixtures cannot be ruled out
    /// and are recalled.
    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, UpstreamError> {
        self.enter("list_devices")?;
        let fixtures = self.fixtures.read();
        let function_ids = filter.function_ids();
        Ok(fixtures
            .devices
            .iter()
            .filter(|d| filter.ids.as_ref().is_none_or(|ids| ids.contains(&d.id)))
            .filter(|d| {
                function_ids.is_empty()
                    || fixtures
                        .device_types
                        .iter()
                        .find(|t| t.id == d.device_type_id)
                        .is_none_or(|t| type_mentions(t, &function_ids))
            })
            .cloned()
            .collect())
    }

    async fn device(&self, id: &str) -> Result<Device, UpstreamError> {
        self.enter("device")?;
        self.fixtures
            .read()
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(format!("device '{}'", id)))
    }

    async fn device_type(&self, id: &str) -> Result<DeviceType, UpstreamError> {
        self.enter("device_type")?;
        self.fixtures
            .read()
            .device_types
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(format!("device type '{}'", id)))
    }

    async fn list_device_types(&self) -> Result<Vec<DeviceType>, UpstreamError> {
        self.enter("list_device_types")?;
        Ok(self.fixtures.read().device_types.clone())
    }

    async fn list_aspects(&self) -> Result<Vec<Aspect>, UpstreamError> {
        self.enter("list_aspects")?;
        Ok(self.fixtures.read().aspects.clone())
    }

    async fn list_functions(&self) -> Result<Vec<Function>, UpstreamError> {
        self.enter("list_functions")?;
        Ok(self.fixtures.read().functions.clone())
    }

    async fn list_concepts(&self) -> Result<Vec<Concept>, UpstreamError> {
        self.enter("list_concepts")?;
        Ok(self.fixtures.read().concepts.clone())
    }

    async fn list_device_groups(&self) -> Result<Vec<DeviceGroup>, UpstreamError> {
        self.enter("list_device_groups")?;
        Ok(self.fixtures.read().device_groups.clone())
    }
}

#[async_trait]
impl PermissionOracle for MemoryUpstream {
    async fn check(
        &self,
        token: &str,
        kind: ResourceKind,
        id: &str,
        _action: Action,
    ) -> Result<bool, UpstreamError> {
        self.enter("check")?;
        Ok(match self.grant(token)? {
            None => self.all_ids(kind).iter().any(|i| i == id),
            Some(grant) => grant.ids(kind).iter().any(|i| i == id),
        })
    }

    async fn list_readable(
        &self,
        token: &str,
        kind: ResourceKind,
    ) -> Result<Vec<String>, UpstreamError> {
        self.enter("list_readable")?;
        Ok(match self.grant(token)? {
            None => self.all_ids(kind),
            Some(grant) => grant.ids(kind).to_vec(),
        })
    }
}

#[async_trait]
impl ImportRepository for MemoryUpstream {
    async fn list_import_types(&self, token: &str) -> Result<Vec<ImportType>, UpstreamError> {
        self.enter("list_import_types")?;
        self.grant(token)?;
        Ok(self.fixtures.read().import_types.clone())
    }

    async fn list_imports(&self, token: &str) -> Result<Vec<Import>, UpstreamError> {
        self.enter("list_imports")?;
        let grant = self.grant(token)?;
        Ok(self
            .fixtures
            .read()
            .imports
            .iter()
            .filter(|i| grant.as_ref().is_none_or(|g| g.imports.contains(&i.id)))
            .cloned()
            .collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> Fixtures {
        Fixtures {
            devices: vec![
                Device {
                    id: "d1".into(),
                    device_type_id: "t1".into(),
                    ..Device::default()
                },
                Device {
                    id: "d2".into(),
                    device_type_id: "t1".into(),
                    ..Device::default()
                },
            ],
            ..Fixtures::default()
        }
    }

    #[tokio::test]
    async fn open_catalog_reads_everything() {
        let upstream = MemoryUpstream::new(fixtures());
        let ids = upstream
            .list_readable("any", ResourceKind::Devices)
            .await
            .expect("readable");
        assert_eq!(ids, vec!["d1".to_string(), "d2".to_string()]);
        assert!(upstream
            .check("any", ResourceKind::Devices, "d1", Action::Read)
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn grants_restrict_and_reject_unknown_tokens() {
        let mut f = fixtures();
        f.grants.insert(
            "alice".into(),
            Grant {
                devices: vec!["d2".into()],
                ..Grant::default()
            },
        );
        let upstream = MemoryUpstream::new(f);
        let ids = upstream
            .list_readable("alice", ResourceKind::Devices)
            .await
            .expect("readable");
        assert_eq!(ids, vec!["d2".to_string()]);
        assert_eq!(
            upstream.list_readable("mallory", ResourceKind::Devices).await,
            Err(UpstreamError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn injected_failures_and_call_counts() {
        let upstream = MemoryUpstream::new(fixtures());
        upstream.fail_next(1);
        assert!(upstream.device("d1").await.is_err());
        assert!(upstream.device("d1").await.is_ok());
        assert_eq!(upstream.calls("device"), 2);
        assert!(matches!(
            upstream.device("nope").await,
            Err(UpstreamError::NotFound(_))
        ));
    }
}
