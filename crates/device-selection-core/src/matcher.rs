//! # Criteria Matcher
//!
//! Decides which services of a device type (or which variables of an import
//! type) satisfy one filter criterion.
//!
//! ## Aspect Rule
//!
//! A variable tagged `A_var` satisfies a requested aspect `A_req` iff
//! `A_req` is empty, or `A_var` lies in the subtree of `A_req`
//! (equal or descendant). Untagged variables only satisfy an empty request.
//!
//! When no service of the type has such a variable, variables tagged with
//! an ancestor of `A_req` are accepted instead (upward fallback). The
//! fallback is decided per device type, never per service.

use crate::aspect::AspectIndex;
use crate::function::{FunctionIndex, FunctionKind};
use crate::interaction::{self, Interaction};
use crate::primitives::{MAX_CONTENT_DEPTH, PATH_SEPARATOR};
use crate::{Content, ContentVariable, DeviceType, FilterCriterion, ImportType, Service};

/// Imports are streams: they behave like event services.
pub const IMPORT_INTERACTION: Interaction = Interaction::Event;

/// A variable that satisfied a criterion, with its dotted path.
#[derive(Debug, Clone)]
pub struct MatchedVariable<'a> {
    pub path: String,
    pub variable: &'a ContentVariable,
}

/// All matching variables of one service.
#[derive(Debug, Clone)]
pub struct ServiceMatch<'a> {
    pub service: &'a Service,
    pub variables: Vec<MatchedVariable<'a>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AspectRule {
    /// Variable aspect equals or descends from the requested one.
    Subtree,
    /// Variable aspect is a strict ancestor of the requested one.
    Ancestor,
}

/// The payload trees a function is searched in.
pub(crate) fn contents_for(service: &Service, kind: FunctionKind) -> &[Content] {
    match kind {
        FunctionKind::Measuring => &service.outputs,
        FunctionKind::Controlling => &service.inputs,
        FunctionKind::Unknown => &[],
    }
}

/// Join a parent path and a variable name.
pub(crate) fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", parent, PATH_SEPARATOR, name)
    }
}

/// Catalog snapshot the matcher reads.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub aspects: &'a AspectIndex,
    pub functions: &'a FunctionIndex,
}

impl<'a> MatchContext<'a> {
    #[must_use]
    pub fn new(aspects: &'a AspectIndex, functions: &'a FunctionIndex) -> Self {
        Self { aspects, functions }
    }

    /// Unknown functions and unknown aspects match nothing.
    fn is_resolvable(&self, criterion: &FilterCriterion) -> bool {
        !criterion.function_id.is_empty()
            && self.functions.contains(&criterion.function_id)
            && (criterion.aspect_id.is_empty() || self.aspects.contains(&criterion.aspect_id))
    }

    /// Services of `device_type` satisfying `criterion`, in declaration order.
    #[must_use]
    pub fn match_device_type<'d>(
        &self,
        device_type: &'d DeviceType,
        criterion: &FilterCriterion,
    ) -> Vec<ServiceMatch<'d>> {
        if !self.is_resolvable(criterion) {
            return Vec::new();
        }
        if !criterion.device_class_id.is_empty()
            && device_type.device_class_id != criterion.device_class_id
        {
            return Vec::new();
        }

        let kind = FunctionKind::of(&criterion.function_id);
        let candidates: Vec<&'d Service> = device_type
            .services
            .iter()
            .filter(|s| interaction::is_compatible(s.interaction, criterion.interaction))
            .collect();

        let direct = self.match_services(&candidates, kind, criterion, AspectRule::Subtree);
        if !direct.is_empty() || criterion.aspect_id.is_empty() {
            return direct;
        }
        self.match_services(&candidates, kind, criterion, AspectRule::Ancestor)
    }

    /// Variables of an import type's output satisfying `criterion`.
    #[must_use]
    pub fn match_import_type<'d>(
        &self,
        import_type: &'d ImportType,
        criterion: &FilterCriterion,
    ) -> Vec<MatchedVariable<'d>> {
        if !self.is_resolvable(criterion)
            || !criterion.device_class_id.is_empty()
            || !interaction::is_compatible(IMPORT_INTERACTION, criterion.interaction)
            || FunctionKind::of(&criterion.function_id) != FunctionKind::Measuring
        {
            return Vec::new();
        }

        let mut direct = Vec::new();
        self.walk(&import_type.output, "", 0, criterion, AspectRule::Subtree, &mut direct);
        if !direct.is_empty() || criterion.aspect_id.is_empty() {
            return direct;
        }
        let mut fallback = Vec::new();
        self.walk(&import_type.output, "", 0, criterion, AspectRule::Ancestor, &mut fallback);
        fallback
    }

    /// Whether `variable` directly satisfies `criterion` (no fallback).
    #[must_use]
    pub fn variable_matches(&self, variable: &ContentVariable, criterion: &FilterCriterion) -> bool {
        self.accepts(variable, criterion, AspectRule::Subtree)
    }

    fn match_services<'d>(
        &self,
        services: &[&'d Service],
        kind: FunctionKind,
        criterion: &FilterCriterion,
        rule: AspectRule,
    ) -> Vec<ServiceMatch<'d>> {
        services
            .iter()
            .filter_map(|&service| {
                let mut variables = Vec::new();
                for content in contents_for(service, kind) {
                    self.walk(&content.content_variable, "", 0, criterion, rule, &mut variables);
                }
                (!variables.is_empty()).then_some(ServiceMatch {
                    service,
                    variables,
                })
            })
            .collect()
    }

    fn walk<'d>(
        &self,
        variable: &'d ContentVariable,
        parent_path: &str,
        depth: usize,
        criterion: &FilterCriterion,
        rule: AspectRule,
        out: &mut Vec<MatchedVariable<'d>>,
    ) {
        if depth >= MAX_CONTENT_DEPTH {
            return;
        }
        let path = child_path(parent_path, &variable.name);
        if self.accepts(variable, criterion, rule) {
            out.push(MatchedVariable {
                path: path.clone(),
                variable,
            });
        }
        for child in &variable.sub_content_variables {
            self.walk(child, &path, depth + 1, criterion, rule, out);
        }
    }

    fn accepts(&self, variable: &ContentVariable, criterion: &FilterCriterion, rule: AspectRule) -> bool {
        variable.function_id == criterion.function_id
            && self
                .functions
                .accepts_characteristic(&criterion.function_id, &variable.characteristic_id)
            && self.aspect_accepts(&criterion.aspect_id, &variable.aspect_id, rule)
    }

    fn aspect_accepts(&self, requested: &str, actual: &str, rule: AspectRule) -> bool {
        if requested.is_empty() {
            return rule == AspectRule::Subtree;
        }
        if actual.is_empty() {
            return false;
        }
        match rule {
            AspectRule::Subtree => self.aspects.is_in_subtree(actual, requested),
            AspectRule::Ancestor => self.aspects.is_ancestor(actual, requested),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{CONTROLLING_FUNCTION_PREFIX, MEASURING_FUNCTION_PREFIX};
    use crate::{Aspect, Function};

    fn get_temp() -> String {
        format!("{}getTemperature", MEASURING_FUNCTION_PREFIX)
    }

    fn set_temp() -> String {
        format!("{}setTemperature", CONTROLLING_FUNCTION_PREFIX)
    }

    fn indexes() -> (AspectIndex, FunctionIndex) {
        let aspects = AspectIndex::build(&[Aspect::new("air", "Air").with_children(vec![
            Aspect::new("inside_air", "Inside Air"),
            Aspect::new("outside_air", "Outside Air"),
        ])]);
        let functions = FunctionIndex::build(
            &[
                Function {
                    id: get_temp(),
                    ..Function::default()
                },
                Function {
                    id: set_temp(),
                    ..Function::default()
                },
            ],
            &[],
        );
        (aspects, functions)
    }

    fn leaf(name: &str, function_id: &str, aspect_id: &str) -> ContentVariable {
        ContentVariable {
            name: name.into(),
            function_id: function_id.into(),
            aspect_id: aspect_id.into(),
            ..ContentVariable::default()
        }
    }

    fn service(id: &str, interaction: Interaction, output: Option<ContentVariable>, input: Option<ContentVariable>) -> Service {
        let wrap = |v: ContentVariable| Content {
            content_variable: v,
            ..Content::default()
        };
        Service {
            id: id.into(),
            local_id: id.into(),
            name: id.into(),
            interaction,
            protocol_id: String::new(),
            service_group_key: String::new(),
            inputs: input.into_iter().map(wrap).collect(),
            outputs: output.into_iter().map(wrap).collect(),
        }
    }

    fn device_type(services: Vec<Service>) -> DeviceType {
        DeviceType {
            id: "dt".into(),
            name: "DT".into(),
            device_class_id: "thermometer".into(),
            service_groups: vec![],
            services,
        }
    }

    #[test]
    fn subtree_match_accepts_descendant() {
        let (aspects, functions) = indexes();
        let ctx = MatchContext::new(&aspects, &functions);
        let dt = device_type(vec![service(
            "s1",
            Interaction::Request,
            Some(leaf("temperature", &get_temp(), "inside_air")),
            None,
        )]);

        let matches = ctx.match_device_type(&dt, &FilterCriterion::new(get_temp()).with_aspect("air"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].variables[0].path, "temperature");
    }

    #[test]
    fn sibling_aspect_does_not_match() {
        let (aspects, functions) = indexes();
        let ctx = MatchContext::new(&aspects, &functions);
        let dt = device_type(vec![service(
            "s1",
            Interaction::Request,
            Some(leaf("temperature", &get_temp(), "inside_air")),
            None,
        )]);
        let c = FilterCriterion::new(get_temp()).with_aspect("outside_air");
        assert!(ctx.match_device_type(&dt, &c).is_empty());
    }

    #[test]
    fn upward_fallback_only_without_direct_match() {
        let (aspects, functions) = indexes();
        let ctx = MatchContext::new(&aspects, &functions);
        let generic = service("generic", Interaction::Request, None, Some(leaf("t", &set_temp(), "air")));
        let specific = service("specific", Interaction::Request, None, Some(leaf("t", &set_temp(), "inside_air")));

        let c = FilterCriterion::new(set_temp()).with_aspect("inside_air");

        let only_generic = device_type(vec![generic.clone()]);
        let m = ctx.match_device_type(&only_generic, &c);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].service.id, "generic");

        let both = device_type(vec![generic, specific]);
        let m = ctx.match_device_type(&both, &c);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].service.id, "specific");
    }

    #[test]
    fn untagged_variable_only_matches_empty_aspect() {
        let (aspects, functions) = indexes();
        let ctx = MatchContext::new(&aspects, &functions);
        let dt = device_type(vec![service("s", Interaction::Request, Some(leaf("t", &get_temp(), "")), None)]);
        assert_eq!(ctx.match_device_type(&dt, &FilterCriterion::new(get_temp())).len(), 1);
        assert!(ctx
            .match_device_type(&dt, &FilterCriterion::new(get_temp()).with_aspect("air"))
            .is_empty());
    }

    #[test]
    fn device_class_and_interaction_gates() {
        let (aspects, functions) = indexes();
        let ctx = MatchContext::new(&aspects, &functions);
        let dt = device_type(vec![service("s", Interaction::Event, Some(leaf("t", &get_temp(), "air")), None)]);

        let wrong_class = FilterCriterion::new(get_temp()).with_device_class("lamp");
        assert!(ctx.match_device_type(&dt, &wrong_class).is_empty());

        let wrong_interaction = FilterCriterion::new(get_temp()).with_interaction(Interaction::Request);
        assert!(ctx.match_device_type(&dt, &wrong_interaction).is_empty());

        let event = FilterCriterion::new(get_temp()).with_interaction(Interaction::Event);
        assert_eq!(ctx.match_device_type(&dt, &event).len(), 1);
    }

    #[test]
    fn controlling_functions_search_inputs_only() {
        let (aspects, functions) = indexes();
        let ctx = MatchContext::new(&aspects, &functions);
        let dt = device_type(vec![service("s", Interaction::Request, Some(leaf("t", &set_temp(), "")), None)]);
        assert!(ctx.match_device_type(&dt, &FilterCriterion::new(set_temp())).is_empty());
    }

    #[test]
    fn unknown_function_or_aspect_matches_nothing() {
        let (aspects, functions) = indexes();
        let ctx = MatchContext::new(&aspects, &functions);
        let unknown_fn = format!("{}getHumidity", MEASURING_FUNCTION_PREFIX);
        let dt = device_type(vec![service("s", Interaction::Request, Some(leaf("h", &unknown_fn, "")), None)]);
        assert!(ctx.match_device_type(&dt, &FilterCriterion::new(unknown_fn)).is_empty());

        let dt = device_type(vec![service("s", Interaction::Request, Some(leaf("t", &get_temp(), "mars")), None)]);
        assert!(ctx
            .match_device_type(&dt, &FilterCriterion::new(get_temp()).with_aspect("mars"))
            .is_empty());
    }

    #[test]
    fn import_types_match_measuring_outputs() {
        let (aspects, functions) = indexes();
        let ctx = MatchContext::new(&aspects, &functions);
        let import_type = ImportType {
            id: "it".into(),
            name: "Weather".into(),
            description: String::new(),
            output: ContentVariable {
                name: "output".into(),
                sub_content_variables: vec![ContentVariable {
                    name: "value".into(),
                    sub_content_variables: vec![leaf("temperature", &get_temp(), "outside_air")],
                    ..ContentVariable::default()
                }],
                ..ContentVariable::default()
            },
        };
        let m = ctx.match_import_type(&import_type, &FilterCriterion::new(get_temp()).with_aspect("air"));
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].path, "output.value.temperature");

        let with_class = FilterCriterion::new(get_temp()).with_device_class("thermometer");
        assert!(ctx.match_import_type(&import_type, &with_class).is_empty());
    }
}
