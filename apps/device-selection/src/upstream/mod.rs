//! # Upstream Read APIs
//!
//! The engine reads the catalog through three narrow async traits. Two
//! implementations ship:
//!
//! - [`http`]: REST clients for the device repository, the permission
//!   search and the import services
//! - [`memory`]: an in-memory catalog for tests and offline checks

pub mod http;
pub mod memory;

use async_trait::async_trait;
use device_selection_core::{
    Aspect, Concept, Device, DeviceGroup, DeviceType, FilterCriterion, Function, Import,
    ImportType, SelectionError,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

/// Failure of one upstream call, classified for retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// Network failure, timeout, 408/429/5xx. Retried.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("token rejected by upstream")]
    Unauthorized,

    #[error("access denied by upstream")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    /// The body could not be decoded.
    #[error("undecodable upstream response: {0}")]
    Invalid(String),

    /// Any other non-success status.
    #[error("upstream failure: {0}")]
    Fatal(String),
}

impl UpstreamError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Surface as a request error for the entry `family/key`.
    #[must_use]
    pub fn into_selection(self, family: &str, key: &str) -> SelectionError {
        match self {
            Self::Transient(detail) | Self::Fatal(detail) => SelectionError::UpstreamUnavailable {
                family: family.to_string(),
                key: key.to_string(),
                detail,
            },
            Self::Unauthorized => SelectionError::Unauthorized("token rejected".into()),
            Self::Forbidden => SelectionError::Forbidden(format!("{} '{}'", family, key)),
            Self::NotFound(what) => SelectionError::BadRequest(format!("unknown {}", what)),
            Self::Invalid(detail) => {
                SelectionError::UpstreamInvalid(format!("{}/{}: {}", family, key, detail))
            }
        }
    }
}

// =============================================================================
// REQUEST TYPES
// =============================================================================

/// Resource kinds known to the permission oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Devices,
    DeviceGroups,
    Imports,
}

impl ResourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Devices => "devices",
            Self::DeviceGroups => "device-groups",
            Self::Imports => "imports",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission action. The engine only ever reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "r")]
    Read,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "r",
        }
    }
}

/// Broad-recall device query: devices whose type mentions any criterion's
/// function, optionally restricted to ids. The matcher refines afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<FilterCriterion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
}

impl DeviceFilter {
    /// Function ids the repository should look for, sorted and unique.
    #[must_use]
    pub fn function_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.criteria.iter().map(|c| c.function_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

// =============================================================================
// TRAITS
// =============================================================================

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, UpstreamError>;
    async fn device(&self, id: &str) -> Result<Device, UpstreamError>;
    async fn device_type(&self, id: &str) -> Result<DeviceType, UpstreamError>;
    async fn list_device_types(&self) -> Result<Vec<DeviceType>, UpstreamError>;
    async fn list_aspects(&self) -> Result<Vec<Aspect>, UpstreamError>;
    async fn list_functions(&self) -> Result<Vec<Function>, UpstreamError>;
    async fn list_concepts(&self) -> Result<Vec<Concept>, UpstreamError>;
    async fn list_device_groups(&self) -> Result<Vec<DeviceGroup>, UpstreamError>;
}

#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn check(
        &self,
        token: &str,
        kind: ResourceKind,
        id: &str,
        action: Action,
    ) -> Result<bool, UpstreamError>;

    async fn list_readable(
        &self,
        token: &str,
        kind: ResourceKind,
    ) -> Result<Vec<String>, UpstreamError>;
}

#[async_trait]
pub trait ImportRepository: Send + Sync {
    async fn list_import_types(&self, token: &str) -> Result<Vec<ImportType>, UpstreamError>;
    async fn list_imports(&self, token: &str) -> Result<Vec<Import>, UpstreamError>;
}

/// The three upstreams the catalog reads.
#[derive(Clone)]
pub struct Upstream {
    pub devices: Arc<dyn DeviceRepository>,
    pub permissions: Arc<dyn PermissionOracle>,
    pub imports: Arc<dyn ImportRepository>,
}

impl Upstream {
    /// All three roles served by one implementation.
    pub fn from_single<T>(upstream: Arc<T>) -> Self
    where
        T: DeviceRepository + PermissionOracle + ImportRepository + 'static,
    {
        Self {
            devices: upstream.clone(),
            permissions: upstream.clone(),
            imports: upstream,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_into_selection_errors() {
        let e = UpstreamError::Transient("timeout".into()).into_selection("device-types", "dt1");
        assert_eq!(e.kind(), "upstream_unavailable");
        assert!(e.to_string().contains("device-types/dt1"));

        assert_eq!(UpstreamError::Unauthorized.into_selection("devices", "*").kind(), "unauthorized");
        assert_eq!(UpstreamError::Invalid("eof".into()).into_selection("aspects", "*").kind(), "upstream_invalid");
        assert_eq!(UpstreamError::NotFound("device 'x'".into()).into_selection("devices", "x").kind(), "bad_request");
        assert!(UpstreamError::Transient(String::new()).is_transient());
        assert!(!UpstreamError::Fatal(String::new()).is_transient());
    }

    #[test]
    fn filter_function_ids_are_unique() {
        let filter = DeviceFilter {
            criteria: vec![
                FilterCriterion::new("b"),
                FilterCriterion::new("a"),
                FilterCriterion::new("b").with_aspect("x"),
            ],
            ids: None,
        };
        assert_eq!(filter.function_ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
