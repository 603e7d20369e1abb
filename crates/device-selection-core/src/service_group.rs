//! # Service Group Modifier
//!
//! A device type may partition its services into named groups. Each group
//! yields a virtual device (and virtual device type) addressed through the
//! id modifier `service_group_selection=KEY`, restricted to that group's
//! services. Virtual devices share owner and permissions with their base.

use crate::idmodifier::{self, ModifierParams};
use crate::{Device, DeviceType, SelectionError};

/// The device type restricted to the services of group `key`.
///
/// Id is suffixed, name gets the group name appended.
/// `None` if the type does not declare `key`.
#[must_use]
pub fn restrict_device_type(device_type: &DeviceType, key: &str) -> Option<DeviceType> {
    let group = device_type.service_group(key)?;
    Some(DeviceType {
        id: idmodifier::with_service_group(&device_type.id, key),
        name: format!("{} {}", device_type.name, group.name),
        device_class_id: device_type.device_class_id.clone(),
        service_groups: vec![group.clone()],
        services: device_type
            .services
            .iter()
            .filter(|s| s.service_group_key == key)
            .cloned()
            .collect(),
    })
}

/// The device as the virtual member of group `key`.
#[must_use]
pub fn restrict_device(device: &Device, device_type: &DeviceType, key: &str) -> Option<Device> {
    let group = device_type.service_group(key)?;
    Some(Device {
        id: idmodifier::with_service_group(&device.id, key),
        local_id: device.local_id.clone(),
        name: format!("{} {}", device.name, group.name),
        device_type_id: idmodifier::with_service_group(&device.device_type_id, key),
        owner_id: device.owner_id.clone(),
    })
}

/// One virtual device type per declared group, in declaration order.
#[must_use]
pub fn virtual_device_types(device_type: &DeviceType) -> Vec<DeviceType> {
    device_type
        .service_groups
        .iter()
        .filter_map(|g| restrict_device_type(device_type, &g.key))
        .collect()
}

/// One virtual device (with its virtual type) per declared group.
#[must_use]
pub fn virtual_devices(device: &Device, device_type: &DeviceType) -> Vec<(Device, DeviceType)> {
    device_type
        .service_groups
        .iter()
        .filter_map(|g| {
            Some((
                restrict_device(device, device_type, &g.key)?,
                restrict_device_type(device_type, &g.key)?,
            ))
        })
        .collect()
}

/// Apply the modifier parameters of a (possibly virtual) device id.
///
/// Without a `service_group_selection` the type is returned unchanged.
/// An unknown group key or an unsupported modifier is a bad request.
pub fn apply_modifier(
    device_type: &DeviceType,
    params: &ModifierParams,
) -> Result<DeviceType, SelectionError> {
    if params.is_empty() {
        return Ok(device_type.clone());
    }
    let Some(key) = idmodifier::service_group_selection(params) else {
        return Err(SelectionError::BadRequest(format!(
            "unsupported id modifier for device type '{}'",
            device_type.id
        )));
    };
    restrict_device_type(device_type, key).ok_or_else(|| {
        SelectionError::BadRequest(format!(
            "device type '{}' has no service group '{}'",
            device_type.id, key
        ))
    })
}

// =============================================================================
// TESTS
// =============================================================================
