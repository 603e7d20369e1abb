//! Selection results.

use super::{AspectNode, Device, DeviceGroup, Import, ImportType, Service};
use crate::interaction::Interaction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A scalar input the caller should set to make a measurement well-defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Configurable {
    pub path: String,
    #[serde(default)]
    pub characteristic_id: String,
    #[serde(default)]
    pub aspect_node: AspectNode,
    #[serde(default)]
    pub function_id: String,
    pub value: serde_json::Value,
    #[serde(rename = "type", default)]
    pub value_type: String,
}

/// One matching variable inside a service, addressed by its dotted path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathOption {
    pub path: String,
    #[serde(default)]
    pub characteristic_id: String,
    #[serde(default)]
    pub aspect_node: AspectNode,
    pub function_id: String,
    pub interaction: Interaction,
    #[serde(default)]
    pub is_void: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configurables: Vec<Configurable>,
}

/// The unit returned by a selection: exactly one of device, group or import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selectable {
    Device {
        device: Device,
        services: Vec<Service>,
        service_path_options: BTreeMap<String, Vec<PathOption>>,
    },
    DeviceGroup {
        device_group: DeviceGroup,
    },
    Import {
        import: Import,
        import_type: ImportType,
        service_path_options: BTreeMap<String, Vec<PathOption>>,
    },
}

/// Identity used to deduplicate selectables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SelectableKey {
    Device {
        device_id: String,
        service_ids: Vec<String>,
    },
    DeviceGroup(String),
    Import(String),
}

impl Selectable {
    /// Name used to order results.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            Self::Device { device, .. } => &device.name,
            Self::DeviceGroup { device_group } => &device_group.name,
            Self::Import { import, .. } => &import.name,
        }
    }

    /// Id of the device, group or import.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Device { device, .. } => &device.id,
            Self::DeviceGroup { device_group } => &device_group.id,
            Self::Import { import, .. } => &import.id,
        }
    }

    #[must_use]
    pub fn key(&self) -> SelectableKey {
        match self {
            Self::Device {
                device, services, ..
            } => {
                let mut service_ids: Vec<String> = services.iter().map(|s| s.id.clone()).collect();
                service_ids.sort();
                SelectableKey::Device {
                    device_id: device.id.clone(),
                    service_ids,
                }
            }
            Self::DeviceGroup { device_group } => SelectableKey::DeviceGroup(device_group.id.clone()),
            Self::Import { import, .. } => SelectableKey::Import(import.id.clone()),
        }
    }

    /// Path options of the device or import; empty for groups.
    #[must_use]
    pub fn service_path_options(&self) -> Option<&BTreeMap<String, Vec<PathOption>>> {
        match self {
            Self::Device {
                service_path_options,
                ..
            }
            | Self::Import {
                service_path_options,
                ..
            } => Some(service_path_options),
            Self::DeviceGroup { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectable_serializes_with_kind_tag() {
        let s = Selectable::DeviceGroup {
            device_group: DeviceGroup {
                id: "g1".into(),
                name: "Group".into(),
                ..DeviceGroup::default()
            },
        };
        let json = serde_json::to_value(&s).expect("serialize");
        assert_eq!(json["kind"], "device_group");
        assert_eq!(json["device_group"]["id"], "g1");
        assert!(json.get("device").is_none());
        assert!(json.get("import").is_none());
    }

    #[test]
    fn key_ignores_service_order() {
        let device = Device {
            id: "d".into(),
            name: "D".into(),
            device_type_id: "dt".into(),
            ..Device::default()
        };
        let service = |id: &str| Service {
            id: id.into(),
            local_id: String::new(),
            name: String::new(),
            interaction: Interaction::Request,
            protocol_id: String::new(),
            service_group_key: String::new(),
            inputs: vec![],
            outputs: vec![],
        };
        let a = Selectable::Device {
            device: device.clone(),
            services: vec![service("s1"), service("s2")],
            service_path_options: BTreeMap::new(),
        };
        let b = Selectable::Device {
            device,
            services: vec![service("s2"), service("s1")],
            service_path_options: BTreeMap::new(),
        };
        assert_eq!(a.key(), b.key());
    }
}
