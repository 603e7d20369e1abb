//! # Property-Based Tests
//!
//! Invariants of the selection engine checked with proptest.

mod common;

use common::*;
use device_selection_core::group_usability::{device_type_criteria, intersect};
use device_selection_core::idmodifier;
use device_selection_core::paths::service_path_options;
use device_selection_core::selection::select_device;
use device_selection_core::{
    Aspect, AspectIndex, DeviceType, FilterCriterion, Interaction, MatchContext, ModifierParams,
    SelectionOptions,
};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;

/// A single chain `a0 → a1 → … → a{n-1}`.
fn chain(n: usize) -> AspectIndex {
    let mut current: Option<Aspect> = None;
    for i in (0..n).rev() {
        let mut aspect = Aspect::new(format!("a{}", i), format!("A{}", i));
        if let Some(child) = current.take() {
            aspect.sub_aspects.push(child);
        }
        current = Some(aspect);
    }
    AspectIndex::build(&current.into_iter().collect::<Vec<_>>())
}

fn interaction_strategy() -> impl Strategy<Value = Interaction> {
    prop_oneof![
        Just(Interaction::Event),
        Just(Interaction::EventAndRequest),
        Just(Interaction::Request),
    ]
}

fn sensor_type(services: Vec<(String, Interaction, String)>) -> DeviceType {
    let get = measuring("getTemperature");
    device_type(
        "dt",
        "sensor",
        services
            .into_iter()
            .map(|(id, interaction, aspect)| {
                ServiceBuilder::new(&id)
                    .interaction(interaction)
                    .output(leaf("temperature", &get, &aspect))
                    .build()
            })
            .collect(),
    )
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// A leaf tagged with a descendant (or the node itself) satisfies a
    /// request for the ancestor.
    #[test]
    fn aspect_symmetry(n in 2usize..8, a in 0usize..8, b in 0usize..8) {
        let (x, y) = (a % n, b % n);
        let (req, var) = (x.min(y), x.max(y));
        let aspects = chain(n);
        let functions = functions(&[measuring("getTemperature")]);
        let ctx = MatchContext::new(&aspects, &functions);
        let dt = sensor_type(vec![("s".into(), Interaction::Request, format!("a{}", var))]);

        let criterion = FilterCriterion::new(measuring("getTemperature")).with_aspect(format!("a{}", req));
        let matches = ctx.match_device_type(&dt, &criterion);
        prop_assert_eq!(matches.len(), 1);
        let (var_id, req_id) = (format!("a{}", var), format!("a{}", req));
        prop_assert!(aspects.is_in_subtree(&var_id, &req_id));
    }

    /// Ancestor-tagged services match only when no service matches the
    /// requested subtree.
    #[test]
    fn upward_fallback_only_without_subtree_match(
        n in 3usize..8,
        anc in 0usize..3,
        extra in proptest::option::of(0usize..8),
    ) {
        let req = n - 1;
        prop_assume!(anc < req);
        let aspects = chain(n);
        let functions = functions(&[measuring("getTemperature")]);
        let ctx = MatchContext::new(&aspects, &functions);

        let mut services = vec![("ancestor".to_string(), Interaction::Request, format!("a{}", anc))];
        let direct = extra.map(|e| e % n).filter(|&e| e >= req);
        if let Some(e) = extra {
            services.push(("other".to_string(), Interaction::Request, format!("a{}", e % n)));
        }
        let dt = sensor_type(services);

        let criterion = FilterCriterion::new(measuring("getTemperature")).with_aspect(format!("a{}", req));
        let ids: Vec<_> = ctx.match_device_type(&dt, &criterion).iter().map(|m| m.service.id.clone()).collect();
        if direct.is_some() {
            prop_assert_eq!(ids, vec!["other".to_string()]);
        } else {
            prop_assert!(ids.contains(&"ancestor".to_string()));
        }
    }

    /// The matcher returns a service iff the interaction lattice admits it.
    #[test]
    fn interaction_compatibility(
        declared in interaction_strategy(),
        requested in proptest::option::of(interaction_strategy()),
    ) {
        let aspects = chain(1);
        let functions = functions(&[measuring("getTemperature")]);
        let ctx = MatchContext::new(&aspects, &functions);
        let dt = sensor_type(vec![("s".into(), declared, String::new())]);

        let mut criterion = FilterCriterion::new(measuring("getTemperature"));
        criterion.interaction = requested;
        let matched = !ctx.match_device_type(&dt, &criterion).is_empty();
        let expected = requested.is_none()
            || declared == Interaction::EventAndRequest
            || Some(declared) == requested;
        prop_assert_eq!(matched, expected);
    }

    /// Adding a device never adds group criteria.
    #[test]
    fn group_criteria_monotonic(
        members in vec((interaction_strategy(), 0usize..4), 1..5),
        extra in (interaction_strategy(), 0usize..4),
    ) {
        let aspects = chain(4);
        let functions = functions(&[measuring("getTemperature")]);
        let ctx = MatchContext::new(&aspects, &functions);
        let to_type = |(interaction, aspect): (Interaction, usize)| {
            sensor_type(vec![("s".into(), interaction, format!("a{}", aspect))])
        };

        let types: Vec<DeviceType> = members.into_iter().map(to_type).collect();
        let before = intersect(types.iter().map(|t| device_type_criteria(&ctx, t)));
        let extra_type = to_type(extra);
        let after = intersect(
            types.iter().chain(std::iter::once(&extra_type)).map(|t| device_type_criteria(&ctx, t)),
        );
        prop_assert!(after.is_subset(&before));
    }

    /// parse(encode(base, params)) == (base, params).
    #[test]
    fn id_modifier_round_trip(
        base in "[a-zA-Z0-9:_.-]{1,24}",
        params in btree_map("[a-z_]{1,12}", vec("\\PC{1,8}", 1..4), 0..4),
    ) {
        let params: ModifierParams = params;
        let id = idmodifier::encode(&base, &params);
        let (parsed_base, parsed_params) = idmodifier::parse(&id).expect("parse");
        prop_assert_eq!(parsed_base, base);
        prop_assert_eq!(parsed_params, params);
    }

    /// One service, one criterion: no two path options share a path.
    #[test]
    fn paths_unique_per_service(names in vec("[a-c]{1,2}", 1..10)) {
        let aspects = chain(1);
        let get = measuring("getTemperature");
        let functions = functions(&[get.clone()]);
        let ctx = MatchContext::new(&aspects, &functions);
        let mut builder = ServiceBuilder::new("s");
        for name in &names {
            builder = builder.output(leaf(name, &get, ""));
        }
        let dt = device_type("dt", "sensor", vec![builder.build()]);

        let criterion = FilterCriterion::new(get);
        let matches = ctx.match_device_type(&dt, &criterion);
        let options = service_path_options(&ctx, &matches[0], &criterion);
        let mut paths: Vec<_> = options.iter().map(|o| o.path.clone()).collect();
        let len = paths.len();
        paths.dedup();
        prop_assert_eq!(paths.len(), len);
    }

    /// Identical snapshot and criteria serialize to identical bytes.
    #[test]
    fn selection_is_deterministic(aspect_picks in vec(0usize..5, 1..6)) {
        let aspects = chain(5);
        let functions = functions(&[measuring("getTemperature")]);
        let ctx = MatchContext::new(&aspects, &functions);
        let services = aspect_picks
            .iter()
            .enumerate()
            .map(|(i, a)| (format!("s{}", i), Interaction::Request, format!("a{}", a)))
            .collect();
        let dt = sensor_type(services);
        let d = device("d", "D", "dt");
        let criteria = [FilterCriterion::new(measuring("getTemperature")).with_aspect("a0")];

        let first = serde_json::to_string(&select_device(&ctx, &d, &dt, &criteria, &SelectionOptions::default())).expect("json");
        let second = serde_json::to_string(&select_device(&ctx, &d, &dt, &criteria, &SelectionOptions::default())).expect("json");
        prop_assert_eq!(first, second);
    }
}
