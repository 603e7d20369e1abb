//! # Core Type Definitions
//!
//! This module contains the catalog entities the engine reads and the
//! request-level criteria it evaluates:
//! - Aspect forest (`Aspect`, `AspectNode`)
//! - Functions and concepts (`Function`, `Concept`)
//! - Service payload trees (`ContentVariable`, `Content`)
//! - Devices and their types (`Service`, `DeviceType`, `Device`)
//! - Groups and imports (`DeviceGroup`, `ImportType`, `Import`)
//! - Criteria (`FilterCriterion`, `DeviceGroupFilterCriterion`)
//! - Error types (`SelectionError`)
//!
//! Selection results live in [`selectable`].
//!
//! ## Wire Conventions
//!
//! Optional string ids are plain `String`s where the empty string means
//! "unset". Upstream repositories send them that way and the engine keeps
//! the representation to stay byte-compatible with them.

pub mod selectable;

use crate::interaction::{self, Interaction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use selectable::{Configurable, PathOption, Selectable, SelectableKey};

// =============================================================================
// ASPECTS
// =============================================================================

/// An aspect as delivered by the repository: a node of the raw forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Aspect {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sub_aspects: Vec<Aspect>,
}

impl Aspect {
    /// Create a leaf aspect.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sub_aspects: Vec::new(),
        }
    }

    /// Attach children.
    #[must_use]
    pub fn with_children(mut self, children: Vec<Aspect>) -> Self {
        self.sub_aspects = children;
        self
    }
}

/// Materialized view of one aspect inside its forest.
///
/// `ancestor_ids` is root-first and excludes the node itself.
/// `descendent_ids` is sorted lexicographically and excludes the node itself.
/// The empty node (`AspectNode::default()`) stands in for unknown ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AspectNode {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub root_id: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub child_ids: Vec<String>,
    #[serde(default)]
    pub ancestor_ids: Vec<String>,
    #[serde(default)]
    pub descendent_ids: Vec<String>,
}

impl AspectNode {
    /// True for the placeholder returned for unknown or unset aspects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

// =============================================================================
// FUNCTIONS & CONCEPTS
// =============================================================================

/// A semantic verb. Whether it measures or controls is encoded in the id prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Function {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub concept_id: String,
}

/// A concept groups the characteristics (units, encodings) a function may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Concept {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub characteristic_ids: Vec<String>,
    #[serde(default)]
    pub base_characteristic_id: String,
}

// =============================================================================
// CONTENT VARIABLES
// =============================================================================

/// A typed, possibly nested field of a service payload.
///
/// Variables with a `function_id` are selection targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContentVariable {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: String,
    #[serde(default)]
    pub characteristic_id: String,
    #[serde(default)]
    pub function_id: String,
    #[serde(default)]
    pub aspect_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub is_void: bool,
    #[serde(default, alias = "sub_variables")]
    pub sub_content_variables: Vec<ContentVariable>,
}

impl ContentVariable {
    /// True when the variable has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.sub_content_variables.is_empty()
    }

    /// The variable's value when it is a string, number or boolean.
    #[must_use]
    pub fn scalar_value(&self) -> Option<&serde_json::Value> {
        self.value.as_ref().filter(|v| {
            matches!(
                v,
                serde_json::Value::String(_)
                    | serde_json::Value::Number(_)
                    | serde_json::Value::Bool(_)
            )
        })
    }
}

/// Wrapper around one payload tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Content {
    #[serde(default)]
    pub id: String,
    pub content_variable: ContentVariable,
    #[serde(default)]
    pub serialization: String,
    #[serde(default)]
    pub protocol_segment_id: String,
}

// =============================================================================
// SERVICES & DEVICE TYPES
// =============================================================================

/// A named partition of a device type's services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceGroup {
    pub key: String,
    #[serde(default)]
    pub name: String,
}

/// One callable (or observable) endpoint of a device type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(default)]
    pub local_id: String,
    #[serde(default)]
    pub name: String,
    pub interaction: Interaction,
    #[serde(default)]
    pub protocol_id: String,
    #[serde(default)]
    pub service_group_key: String,
    #[serde(default)]
    pub inputs: Vec<Content>,
    #[serde(default)]
    pub outputs: Vec<Content>,
}

impl Service {
    /// Copy of the service without payload trees.
    #[must_use]
    pub fn skeleton(&self) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            ..self.clone()
        }
    }
}

/// The template every device of a kind shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceType {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device_class_id: String,
    #[serde(default)]
    pub service_groups: Vec<ServiceGroup>,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl DeviceType {
    /// Look up a service by id.
    #[must_use]
    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Look up a declared service group by key.
    #[must_use]
    pub fn service_group(&self, key: &str) -> Option<&ServiceGroup> {
        self.service_groups.iter().find(|g| g.key == key)
    }
}

// =============================================================================
// DEVICES, GROUPS, IMPORTS
// =============================================================================

/// A concrete device instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub local_id: String,
    #[serde(default)]
    pub name: String,
    pub device_type_id: String,
    #[serde(default)]
    pub owner_id: String,
}

/// A user-defined set of devices with the criteria it promises to satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeviceGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub criteria: Vec<DeviceGroupFilterCriterion>,
    #[serde(default)]
    pub device_ids: Vec<String>,
}

/// Template of a streaming import. Its single output tree plays the role of
/// a service output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ImportType {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub output: ContentVariable,
}

/// A running import instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Import {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub import_type_id: String,
}

// =============================================================================
// CRITERIA
// =============================================================================

/// One tuple of a selection request. Empty strings and `None` mean "any".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct FilterCriterion {
    pub function_id: String,
    #[serde(default)]
    pub aspect_id: String,
    #[serde(default)]
    pub device_class_id: String,
    #[serde(default, with = "interaction::optional")]
    pub interaction: Option<Interaction>,
}

impl FilterCriterion {
    /// Criterion on a function alone.
    #[must_use]
    pub fn new(function_id: impl Into<String>) -> Self {
        Self {
            function_id: function_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_aspect(mut self, aspect_id: impl Into<String>) -> Self {
        self.aspect_id = aspect_id.into();
        self
    }

    #[must_use]
    pub fn with_device_class(mut self, device_class_id: impl Into<String>) -> Self {
        self.device_class_id = device_class_id.into();
        self
    }

    #[must_use]
    pub fn with_interaction(mut self, interaction: Interaction) -> Self {
        self.interaction = Some(interaction);
        self
    }
}

/// A criterion a device group declares or an intersection yields.
///
/// Field order defines the sort order of criteria outputs:
/// interaction, function, aspect, device class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct DeviceGroupFilterCriterion {
    #[serde(default, with = "interaction::optional")]
    pub interaction: Option<Interaction>,
    pub function_id: String,
    #[serde(default)]
    pub aspect_id: String,
    #[serde(default)]
    pub device_class_id: String,
}

impl From<&DeviceGroupFilterCriterion> for FilterCriterion {
    fn from(c: &DeviceGroupFilterCriterion) -> Self {
        Self {
            function_id: c.function_id.clone(),
            aspect_id: c.aspect_id.clone(),
            device_class_id: c.device_class_id.clone(),
            interaction: c.interaction,
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors surfaced by a selection request.
///
/// "No match" is never an error: it is an empty selection.
/// `Clone` because one upstream failure fans out to every waiter of a
/// shared load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// Invalid criteria encoding, empty criteria, malformed ids.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The token was missing or rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The token is valid but may not read the resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// An upstream read failed after retries.
    #[error("upstream unavailable ({family}/{key}): {detail}")]
    UpstreamUnavailable {
        family: String,
        key: String,
        detail: String,
    },

    /// An upstream answered with data the engine cannot decode.
    #[error("upstream invalid: {0}")]
    UpstreamInvalid(String),

    /// The request was cancelled or ran past its deadline.
    #[error("request cancelled")]
    Cancelled,

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SelectionError {
    /// The snake_case kind used in error bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::UpstreamInvalid(_) => "upstream_invalid",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
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
    fn scalar_value_rejects_structures() {
        let mut var = ContentVariable {
            name: "x".into(),
            value: Some(serde_json::json!(30)),
            ..ContentVariable::default()
        };
        assert!(var.scalar_value().is_some());

        var.value = Some(serde_json::json!({"a": 1}));
        assert!(var.scalar_value().is_none());

        var.value = Some(serde_json::Value::Null);
        assert!(var.scalar_value().is_none());
    }

    #[test]
    fn criterion_empty_interaction_deserializes_to_none() {
        let json = r#"{"function_id":"f","aspect_id":"","device_class_id":"","interaction":""}"#;
        let c: FilterCriterion = serde_json::from_str(json).expect("parse");
        assert_eq!(c.interaction, None);

        let json = r#"{"function_id":"f"}"#;
        let c: FilterCriterion = serde_json::from_str(json).expect("parse");
        assert_eq!(c.interaction, None);
        assert!(c.aspect_id.is_empty());
    }

    #[test]
    fn group_criteria_sort_by_interaction_first() {
        let a = DeviceGroupFilterCriterion {
            interaction: Some(Interaction::Request),
            function_id: "a".into(),
            ..Default::default()
        };
        let b = DeviceGroupFilterCriterion {
            interaction: Some(Interaction::Event),
            function_id: "z".into(),
            ..Default::default()
        };
        let mut v = vec![a.clone(), b.clone()];
        v.sort();
        assert_eq!(v, vec![b, a]);
    }

    #[test]
    fn error_kinds() {
        assert_eq!(SelectionError::Cancelled.kind(), "cancelled");
        assert_eq!(
            SelectionError::BadRequest("x".into()).kind(),
            "bad_request"
        );
        let e = SelectionError::UpstreamUnavailable {
            family: "device-types".into(),
            key: "dt1".into(),
            detail: "timeout".into(),
        };
        assert_eq!(e.kind(), "upstream_unavailable");
        assert!(e.to_string().contains("device-types/dt1"));
    }

    #[test]
    fn service_skeleton_drops_contents() {
        let service = Service {
            id: "s".into(),
            local_id: "l".into(),
            name: "n".into(),
            interaction: Interaction::Request,
            protocol_id: "p".into(),
            service_group_key: String::new(),
            inputs: vec![Content::default()],
            outputs: vec![Content::default()],
        };
        let skeleton = service.skeleton();
        assert!(skeleton.inputs.is_empty());
        assert!(skeleton.outputs.is_empty());
        assert_eq!(skeleton.id, "s");
    }
}
