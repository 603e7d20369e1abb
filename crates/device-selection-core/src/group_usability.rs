//! # Group Usability
//!
//! A device group is usable for a criterion when every member can serve it.
//! This module computes the criteria each device type offers, intersects
//! them over a group, and rates candidate devices by what adding them would
//! remove from that intersection.
//!
//! ## Offered Criteria
//!
//! For every annotated leaf (inputs for controlling functions, outputs for
//! measuring functions) a device type offers
//! `(interaction, function, aspect, device_class)` where:
//! - the aspect axis is expanded to every ancestor of the leaf's aspect;
//! - `event+request` services offer all three interactions;
//! - the device class is only set for controlling functions.

use crate::function::FunctionKind;
use crate::matcher::{MatchContext, contents_for};
use crate::primitives::MAX_CONTENT_DEPTH;
use crate::{ContentVariable, Device, DeviceGroupFilterCriterion, DeviceType, Service};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Criteria sorted by (interaction, function, aspect, device class).
pub type CriteriaSet = BTreeSet<DeviceGroupFilterCriterion>;

/// Every criterion `device_type` can serve. Unknown functions are skipped.
#[must_use]
pub fn device_type_criteria(ctx: &MatchContext<'_>, device_type: &DeviceType) -> CriteriaSet {
    let mut out = CriteriaSet::new();
    for service in &device_type.services {
        for kind in [FunctionKind::Measuring, FunctionKind::Controlling] {
            for content in contents_for(service, kind) {
                collect(ctx, device_type, service, kind, &content.content_variable, 0, &mut out);
            }
        }
    }
    out
}

fn collect(
    ctx: &MatchContext<'_>,
    device_type: &DeviceType,
    service: &Service,
    kind: FunctionKind,
    variable: &ContentVariable,
    depth: usize,
    out: &mut CriteriaSet,
) {
    if depth >= MAX_CONTENT_DEPTH {
        return;
    }
    for child in &variable.sub_content_variables {
        collect(ctx, device_type, service, kind, child, depth + 1, out);
    }
    if variable.function_id.is_empty()
        || FunctionKind::of(&variable.function_id) != kind
        || !ctx.functions.contains(&variable.function_id)
    {
        return;
    }

    let device_class_id = if kind == FunctionKind::Controlling {
        device_type.device_class_id.clone()
    } else {
        String::new()
    };
    let aspects: Vec<String> = if variable.aspect_id.is_empty() {
        vec![String::new()]
    } else {
        std::iter::once(variable.aspect_id.clone())
            .chain(ctx.aspects.ancestors(&variable.aspect_id).iter().cloned())
            .collect()
    };

    for &interaction in service.interaction.served() {
        for aspect_id in &aspects {
            out.insert(DeviceGroupFilterCriterion {
                interaction: Some(interaction),
                function_id: variable.function_id.clone(),
                aspect_id: aspect_id.clone(),
                device_class_id: device_class_id.clone(),
            });
        }
    }
}

/// Criteria common to every set. No sets yield no criteria.
#[must_use]
pub fn intersect<I>(sets: I) -> CriteriaSet
where
    I: IntoIterator<Item = CriteriaSet>,
{
    let mut sets = sets.into_iter();
    let Some(first) = sets.next() else {
        return CriteriaSet::new();
    };
    sets.fold(first, |acc, next| acc.intersection(&next).cloned().collect())
}

/// Intersection of the criteria of all given device types.
#[must_use]
pub fn group_criteria<'d, I>(ctx: &MatchContext<'_>, device_types: I) -> CriteriaSet
where
    I: IntoIterator<Item = &'d DeviceType>,
{
    intersect(device_types.into_iter().map(|dt| device_type_criteria(ctx, dt)))
}

// =============================================================================
// GROUP HELPER
// =============================================================================

/// Impact of adding one candidate device to the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupHelperOption {
    pub device: Device,
    pub removes_criteria: Vec<DeviceGroupFilterCriterion>,
    pub maintains_usability: bool,
}

/// Current group criteria and the rated candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GroupHelperResult {
    pub criteria: Vec<DeviceGroupFilterCriterion>,
    pub options: Vec<GroupHelperOption>,
}

/// Rate every candidate not already a member.
///
/// A candidate maintains usability when the group would still share at
/// least one criterion after adding it. With `maintains_usability` only
/// such candidates are returned. Options are ordered by device name, then id.
#[must_use]
pub fn group_helper(
    ctx: &MatchContext<'_>,
    members: &[(Device, DeviceType)],
    candidates: &[(Device, DeviceType)],
    maintains_usability: bool,
) -> GroupHelperResult {
    let current = group_criteria(ctx, members.iter().map(|(_, dt)| dt));
    let member_ids: BTreeSet<&str> = members.iter().map(|(d, _)| d.id.as_str()).collect();

    let mut options: Vec<GroupHelperOption> = candidates
        .iter()
        .filter(|(d, _)| !member_ids.contains(d.id.as_str()))
        .map(|(device, dt)| {
            let offered = device_type_criteria(ctx, dt);
            let after: CriteriaSet = if members.is_empty() {
                offered
            } else {
                current.intersection(&offered).cloned().collect()
            };
            GroupHelperOption {
                device: device.clone(),
                removes_criteria: current.difference(&after).cloned().collect(),
                maintains_usability: !after.is_empty(),
            }
        })
        .filter(|o| !maintains_usability || o.maintains_usability)
        .collect();
    options.sort_by(|a, b| {
        a.device
            .name
            .cmp(&b.device.name)
            .then_with(|| a.device.id.cmp(&b.device.id))
    });

    GroupHelperResult {
        criteria: current.into_iter().collect(),
        options,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::AspectIndex;
    use crate::function::FunctionIndex;
    use crate::interaction::Interaction;
    use crate::primitives::{CONTROLLING_FUNCTION_PREFIX, MEASURING_FUNCTION_PREFIX};
    use crate::{Aspect, Content, Function};

    fn f(prefix: &str, name: &str) -> String {
        format!("{}{}", prefix, name)
    }

    fn indexes() -> (AspectIndex, FunctionIndex) {
        let functions = [
            f(MEASURING_FUNCTION_PREFIX, "getTemperature"),
            f(CONTROLLING_FUNCTION_PREFIX, "setOn"),
        ]
        .into_iter()
        .map(|id| Function {
            id,
            ..Function::default()
        })
        .collect::<Vec<_>>();
        (
            AspectIndex::build(&[Aspect::new("air", "Air")
                .with_children(vec![Aspect::new("inside_air", "Inside Air")])]),
            FunctionIndex::build(&functions, &[]),
        )
    }

    fn leaf(function_id: String, aspect_id: &str) -> Content {
        Content {
            content_variable: ContentVariable {
                name: "v".into(),
                function_id,
                aspect_id: aspect_id.into(),
                ..ContentVariable::default()
            },
            ..Content::default()
        }
    }

    fn dt(id: &str, interaction: Interaction, inputs: Vec<Content>, outputs: Vec<Content>) -> DeviceType {
        DeviceType {
            id: id.into(),
            name: id.into(),
            device_class_id: "sensor".into(),
            service_groups: vec![],
            services: vec![Service {
                id: format!("{}_s", id),
                local_id: String::new(),
                name: String::new(),
                interaction,
                protocol_id: String::new(),
                service_group_key: String::new(),
                inputs,
                outputs,
            }],
        }
    }

    #[test]
    fn aspects_expand_to_ancestors_and_class_only_for_controlling() {
        let (aspects, functions) = indexes();
        let ctx = MatchContext::new(&aspects, &functions);
        let t = dt(
            "t",
            Interaction::Request,
            vec![leaf(f(CONTROLLING_FUNCTION_PREFIX, "setOn"), "")],
            vec![leaf(f(MEASURING_FUNCTION_PREFIX, "getTemperature"), "inside_air")],
        );
        let criteria = device_type_criteria(&ctx, &t);
        let as_tuples: Vec<_> = criteria
            .iter()
            .map(|c| (c.aspect_id.as_str(), c.device_class_id.as_str()))
            .collect();
        assert_eq!(as_tuples, vec![("", "sensor"), ("air", ""), ("inside_air", "")]);
    }

    #[test]
    fn event_and_request_offers_every_interaction() {
        let (aspects, functions) = indexes();
        let ctx = MatchContext::new(&aspects, &functions);
        let t = dt(
            "t",
            Interaction::EventAndRequest,
            vec![],
            vec![leaf(f(MEASURING_FUNCTION_PREFIX, "getTemperature"), "")],
        );
        assert_eq!(device_type_criteria(&ctx, &t).len(), 3);
    }

    #[test]
    fn wrong_direction_and_unknown_functions_are_skipped() {
        let (aspects, functions) = indexes();
        let ctx = MatchContext::new(&aspects, &functions);
        let t = dt(
            "t",
            Interaction::Request,
            vec![leaf(f(MEASURING_FUNCTION_PREFIX, "getTemperature"), "")],
            vec![leaf(f(MEASURING_FUNCTION_PREFIX, "getHumidity"), "")],
        );
        assert!(device_type_criteria(&ctx, &t).is_empty());
    }

    #[test]
    fn intersect_of_nothing_is_empty() {
        assert!(intersect(Vec::<CriteriaSet>::new()).is_empty());
    }

    #[test]
    fn helper_reports_removed_criteria() {
        let (aspects, functions) = indexes();
        let ctx = MatchContext::new(&aspects, &functions);
        let both = dt(
            "both",
            Interaction::Request,
            vec![leaf(f(CONTROLLING_FUNCTION_PREFIX, "setOn"), "")],
            vec![leaf(f(MEASURING_FUNCTION_PREFIX, "getTemperature"), "")],
        );
        let switch = dt("switch", Interaction::Request, vec![leaf(f(CONTROLLING_FUNCTION_PREFIX, "setOn"), "")], vec![]);
        let event = dt("event", Interaction::Event, vec![leaf(f(CONTROLLING_FUNCTION_PREFIX, "setOn"), "")], vec![]);
        let device = |id: &str| Device {
            id: id.into(),
            name: id.into(),
            device_type_id: id.into(),
            ..Device::default()
        };

        let members = vec![(device("m"), both.clone())];
        let candidates = vec![
            (device("m"), both),
            (device("s"), switch),
            (device("e"), event),
        ];

        let result = group_helper(&ctx, &members, &candidates, false);
        assert_eq!(result.criteria.len(), 2);
        assert_eq!(result.options.len(), 2);
        assert_eq!(result.options[0].device.id, "e");
        assert!(!result.options[0].maintains_usability);
        assert_eq!(result.options[0].removes_criteria.len(), 2);
        assert_eq!(result.options[1].device.id, "s");
        assert!(result.options[1].maintains_usability);
        assert_eq!(result.options[1].removes_criteria.len(), 1);

        let kept = group_helper(&ctx, &members, &candidates, true);
        assert_eq!(kept.options.len(), 1);
        assert_eq!(kept.options[0].device.id, "s");
    }
}
