//! # Selection Engine
//!
//! The synchronous half of `GetSelectables`: given a catalog snapshot and the
//! already-fetched devices, groups and imports, decide what is selectable.
//!
//! ## Rules
//!
//! - A device is selected iff every criterion is satisfied by at least one
//!   of its (unblocked) services. Path options of all criteria are unioned
//!   per service.
//! - Block filters (`filter_interaction`, `filter_protocols`) apply after
//!   matching, so they never change the upward fallback decision.
//! - Results are deduplicated by [`SelectableKey`] and ordered by display
//!   name, then id.

use crate::interaction::Interaction;
use crate::matcher::{IMPORT_INTERACTION, MatchContext, ServiceMatch};
use crate::paths::{import_path_options, normalize, service_path_options};
use crate::primitives::MAX_CRITERIA;
use crate::service_group::{virtual_device_types, virtual_devices};
use crate::{
    Device, DeviceGroup, DeviceGroupFilterCriterion, DeviceType, FilterCriterion, Import, ImportType, PathOption, Selectable,
    SelectableKey, SelectionError, Service, idmodifier, interaction,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// OPTIONS
// =============================================================================

/// Request flags of a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionOptions {
    pub include_devices: bool,
    pub include_groups: bool,
    pub include_imports: bool,
    pub include_id_modified: bool,
    /// Services with one of these interactions are blocked.
    pub filter_interaction: Vec<Interaction>,
    /// Services with one of these protocols are blocked.
    pub filter_protocols: Vec<String>,
    pub with_device_ids: Option<Vec<String>>,
    pub with_local_device_ids: Option<Vec<String>>,
    pub local_device_owner: String,
    pub complete_services: bool,
    pub trim_path_prefix: bool,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            include_devices: true,
            include_groups: false,
            include_imports: false,
            include_id_modified: false,
            filter_interaction: Vec::new(),
            filter_protocols: Vec::new(),
            with_device_ids: None,
            with_local_device_ids: None,
            local_device_owner: String::new(),
            complete_services: false,
            trim_path_prefix: false,
        }
    }
}

impl SelectionOptions {
    /// Whether `service` survives the block filters.
    #[must_use]
    pub fn allows_service(&self, service: &Service) -> bool {
        !self.filter_interaction.contains(&service.interaction)
            && !self.filter_protocols.contains(&service.protocol_id)
    }

    /// Whether `device` survives `with_device_ids` / `with_local_device_ids`.
    ///
    /// Ids in `with_device_ids` are compared by base, so a virtual id admits
    /// its base device.
    #[must_use]
    pub fn allows_device(&self, device: &Device) -> bool {
        if let Some(ids) = &self.with_device_ids
            && !ids.iter().any(|id| idmodifier::strip(id) == device.id)
        {
            return false;
        }
        if let Some(local_ids) = &self.with_local_device_ids {
            if !local_ids.contains(&device.local_id) {
                return false;
            }
            if !self.local_device_owner.is_empty() && self.local_device_owner != device.owner_id {
                return false;
            }
        }
        true
    }

    /// Whether a base or virtual device id is emitted under `with_device_ids`.
    ///
    /// Full ids are compared here: a plain id admits only the base device,
    /// a virtual id only that variant.
    #[must_use]
    pub fn emits_device_id(&self, id: &str) -> bool {
        self.with_device_ids
            .as_ref()
            .is_none_or(|ids| ids.iter().any(|allowed| allowed == id))
    }
}

/// Reject criteria sets the engine refuses to evaluate.
pub fn validate_criteria(criteria: &[FilterCriterion]) -> Result<(), SelectionError> {
    if criteria.is_empty() {
        return Err(SelectionError::BadRequest("criteria must not be empty".into()));
    }
    if criteria.len() > MAX_CRITERIA {
        return Err(SelectionError::BadRequest(format!(
            "too many criteria: {} (max {})",
            criteria.len(),
            MAX_CRITERIA
        )));
    }
    if let Some(i) = criteria.iter().position(|c| c.function_id.is_empty()) {
        return Err(SelectionError::BadRequest(format!(
            "criterion {} has no function_id",
            i
        )));
    }
    Ok(())
}

// =============================================================================
// DEVICES
// =============================================================================

/// Select one device (base or virtual) against all criteria.
#[must_use]
pub fn select_device(
    ctx: &MatchContext<'_>,
    device: &Device,
    device_type: &DeviceType,
    criteria: &[FilterCriterion],
    options: &SelectionOptions,
) -> Option<Selectable> {
    let mut per_service: BTreeMap<String, Vec<PathOption>> = BTreeMap::new();
    for criterion in criteria {
        let matches: Vec<ServiceMatch<'_>> = ctx
            .match_device_type(device_type, criterion)
            .into_iter()
            .filter(|m| options.allows_service(m.service))
            .collect();
        if matches.is_empty() {
            return None;
        }
        for m in &matches {
            per_service
                .entry(m.service.id.clone())
                .or_default()
                .extend(service_path_options(ctx, m, criterion));
        }
    }

    let service_path_options: BTreeMap<String, Vec<PathOption>> = per_service
        .into_iter()
        .map(|(id, opts)| (id, normalize(opts)))
        .collect();
    let services = device_type
        .services
        .iter()
        .filter(|s| service_path_options.contains_key(&s.id))
        .map(|s| {
            if options.complete_services {
                s.clone()
            } else {
                s.skeleton()
            }
        })
        .collect();

    Some(Selectable::Device {
        device: device.clone(),
        services,
        service_path_options,
    })
}

/// The base device plus, with `include_id_modified`, one virtual device per
/// service group, each kept only if it satisfies the criteria and
/// `with_device_ids` names its full id.
#[must_use]
pub fn select_device_variants(
    ctx: &MatchContext<'_>,
    device: &Device,
    device_type: &DeviceType,
    criteria: &[FilterCriterion],
    options: &SelectionOptions,
) -> Vec<Selectable> {
    let mut out: Vec<Selectable> = Vec::new();
    if options.emits_device_id(&device.id) {
        out.extend(select_device(ctx, device, device_type, criteria, options));
    }
    if options.include_id_modified {
        out.extend(
            virtual_devices(device, device_type)
                .iter()
                .filter(|(vd, _)| options.emits_device_id(&vd.id))
                .filter_map(|(vd, vdt)| select_device(ctx, vd, vdt, criteria, options)),
        );
    }
    out
}

/// Whether any unblocked service set of `device_type` satisfies every criterion.
#[must_use]
pub fn device_type_satisfies(
    ctx: &MatchContext<'_>,
    device_type: &DeviceType,
    criteria: &[FilterCriterion],
    options: &SelectionOptions,
) -> bool {
    criteria.iter().all(|c| {
        ctx.match_device_type(device_type, c)
            .iter()
            .any(|m| options.allows_service(m.service))
    })
}

/// Device types (and, with `include_id_modified`, their virtual group
/// types) satisfying the criteria, sorted by id. Empty criteria keep all.
#[must_use]
pub fn filter_device_types(
    ctx: &MatchContext<'_>,
    device_types: &[DeviceType],
    criteria: &[FilterCriterion],
    options: &SelectionOptions,
) -> Vec<DeviceType> {
    let mut out: Vec<DeviceType> = Vec::new();
    for dt in device_types {
        let mut candidates = vec![dt.clone()];
        if options.include_id_modified {
            candidates.extend(virtual_device_types(dt));
        }
        out.extend(
            candidates
                .into_iter()
                .filter(|c| device_type_satisfies(ctx, c, criteria, options)),
        );
    }
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out.dedup_by(|b, a| a.id == b.id);
    out
}

// =============================================================================
// DEVICE GROUPS
// =============================================================================

/// Whether a declared group criterion covers a requested one.
///
/// Empty requested fields are wildcards; so are empty declared fields.
/// A declared aspect must lie in the subtree of the requested one, and a
/// declared interaction must be able to serve the requested one.
#[must_use]
pub fn group_criterion_covers(
    ctx: &MatchContext<'_>,
    declared: &DeviceGroupFilterCriterion,
    requested: &FilterCriterion,
) -> bool {
    if declared.function_id != requested.function_id {
        return false;
    }
    let class_ok = requested.device_class_id.is_empty()
        || declared.device_class_id.is_empty()
        || declared.device_class_id == requested.device_class_id;
    let aspect_ok = requested.aspect_id.is_empty()
        || declared.aspect_id.is_empty()
        || ctx.aspects.is_in_subtree(&declared.aspect_id, &requested.aspect_id);
    let interaction_ok = match declared.interaction {
        None => true,
        Some(d) => interaction::is_compatible(d, requested.interaction),
    };
    class_ok && aspect_ok && interaction_ok
}

/// Whether the group's declared criteria cover every requested criterion.
#[must_use]
pub fn group_satisfies(
    ctx: &MatchContext<'_>,
    group: &DeviceGroup,
    criteria: &[FilterCriterion],
) -> bool {
    criteria.iter().all(|requested| {
        group
            .criteria
            .iter()
            .any(|declared| group_criterion_covers(ctx, declared, requested))
    })
}

#[must_use]
pub fn select_groups(
    ctx: &MatchContext<'_>,
    groups: &[DeviceGroup],
    criteria: &[FilterCriterion],
) -> Vec<Selectable> {
    groups
        .iter()
        .filter(|g| group_satisfies(ctx, g, criteria))
        .map(|g| Selectable::DeviceGroup {
            device_group: g.clone(),
        })
        .collect()
}

// =============================================================================
// IMPORTS
// =============================================================================

/// One selectable per running import whose type satisfies every criterion.
///
/// Import types behave like a single event service keyed by the type id.
#[must_use]
pub fn select_imports(
    ctx: &MatchContext<'_>,
    import_types: &[ImportType],
    imports: &[Import],
    criteria: &[FilterCriterion],
    options: &SelectionOptions,
) -> Vec<Selectable> {
    if options.filter_interaction.contains(&IMPORT_INTERACTION) {
        return Vec::new();
    }

    let mut out = Vec::new();
    for import_type in import_types {
        let mut path_options = Vec::new();
        let mut satisfied = true;
        for criterion in criteria {
            let vars = ctx.match_import_type(import_type, criterion);
            if vars.is_empty() {
                satisfied = false;
                break;
            }
            path_options.extend(import_path_options(
                ctx,
                import_type,
                &vars,
                options.trim_path_prefix,
            ));
        }
        if !satisfied {
            continue;
        }

        let mut service_path_options = BTreeMap::new();
        service_path_options.insert(import_type.id.clone(), normalize(path_options));
        out.extend(
            imports
                .iter()
                .filter(|i| i.import_type_id == import_type.id)
                .map(|import| Selectable::Import {
                    import: import.clone(),
                    import_type: import_type.clone(),
                    service_path_options: service_path_options.clone(),
                }),
        );
    }
    out
}

// =============================================================================
// MERGE
// =============================================================================

/// Deduplicate by identity (first wins) and order by display name, then id.
#[must_use]
pub fn finalize(selectables: Vec<Selectable>) -> Vec<Selectable> {
    let mut seen: BTreeSet<SelectableKey> = BTreeSet::new();
    let mut out: Vec<Selectable> = selectables
        .into_iter()
        .filter(|s| seen.insert(s.key()))
        .collect();
    out.sort_by(|a, b| {
        a.display_name()
            .cmp(b.display_name())
            .then_with(|| a.id().cmp(b.id()))
    });
    out
}

// =============================================================================
// TESTS
// =============================================================================
