//! # Path Expander
//!
//! Turns matched variables into `PathOption`s: dotted path, aspect node,
//! characteristic, and the configurables a caller must set.
//!
//! Paths start at the name of the content's root variable. Options of one
//! service are sorted by path and unique by path.

use crate::function::FunctionKind;
use crate::matcher::{IMPORT_INTERACTION, MatchContext, MatchedVariable, ServiceMatch, child_path};
use crate::primitives::{MAX_CONTENT_DEPTH, PATH_SEPARATOR};
use crate::{Configurable, ContentVariable, FilterCriterion, ImportType, PathOption, Service};

/// Path options for every matched variable of one service.
#[must_use]
pub fn service_path_options(
    ctx: &MatchContext<'_>,
    service_match: &ServiceMatch<'_>,
    criterion: &FilterCriterion,
) -> Vec<PathOption> {
    let configurables = configurables(ctx, service_match.service, criterion);
    let options = service_match
        .variables
        .iter()
        .map(|m| PathOption {
            path: m.path.clone(),
            characteristic_id: m.variable.characteristic_id.clone(),
            aspect_node: ctx.aspects.node_of(&m.variable.aspect_id),
            function_id: m.variable.function_id.clone(),
            interaction: service_match.service.interaction,
            is_void: m.variable.is_void,
            configurables: configurables.clone(),
        })
        .collect();
    normalize(options)
}

/// Path options for the matched variables of an import type.
///
/// With `trim_prefix`, the leading root segment (`output.`) is removed.
#[must_use]
pub fn import_path_options(
    ctx: &MatchContext<'_>,
    import_type: &ImportType,
    variables: &[MatchedVariable<'_>],
    trim_prefix: bool,
) -> Vec<PathOption> {
    let prefix = format!("{}{}", import_type.output.name, PATH_SEPARATOR);
    let options = variables
        .iter()
        .map(|m| {
            let path = if trim_prefix {
                m.path.strip_prefix(&prefix).unwrap_or(&m.path).to_string()
            } else {
                m.path.clone()
            };
            PathOption {
                path,
                characteristic_id: m.variable.characteristic_id.clone(),
                aspect_node: ctx.aspects.node_of(&m.variable.aspect_id),
                function_id: m.variable.function_id.clone(),
                interaction: IMPORT_INTERACTION,
                is_void: m.variable.is_void,
                configurables: Vec::new(),
            }
        })
        .collect();
    normalize(options)
}

/// Sort by path and keep the first option of each path.
#[must_use]
pub fn normalize(mut options: Vec<PathOption>) -> Vec<PathOption> {
    options.sort_by(|a, b| a.path.cmp(&b.path));
    options.dedup_by(|b, a| a.path == b.path);
    options
}

/// Scalar input leaves of `service` a caller should set alongside `criterion`.
///
/// A leaf qualifies when it carries a scalar value, is not itself annotated
/// with the criterion's function, is not annotated with a measuring
/// function, and its aspect (if any) lies on the requested aspect's branch.
fn configurables(
    ctx: &MatchContext<'_>,
    service: &Service,
    criterion: &FilterCriterion,
) -> Vec<Configurable> {
    let mut out = Vec::new();
    for content in &service.inputs {
        collect_configurables(ctx, &content.content_variable, "", 0, criterion, &mut out);
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out.dedup_by(|b, a| a.path == b.path);
    out
}

fn collect_configurables(
    ctx: &MatchContext<'_>,
    variable: &ContentVariable,
    parent_path: &str,
    depth: usize,
    criterion: &FilterCriterion,
    out: &mut Vec<Configurable>,
) {
    if depth >= MAX_CONTENT_DEPTH {
        return;
    }
    let path = child_path(parent_path, &variable.name);
    if !variable.is_leaf() {
        for child in &variable.sub_content_variables {
            collect_configurables(ctx, child, &path, depth + 1, criterion, out);
        }
        return;
    }

    let Some(value) = variable.scalar_value() else {
        return;
    };
    if !variable.function_id.is_empty()
        && (variable.function_id == criterion.function_id
            || FunctionKind::of(&variable.function_id) != FunctionKind::Controlling)
    {
        return;
    }
    if !variable.aspect_id.is_empty()
        && !criterion.aspect_id.is_empty()
        && !ctx.aspects.on_same_branch(&variable.aspect_id, &criterion.aspect_id)
    {
        return;
    }

    out.push(Configurable {
        path,
        characteristic_id: variable.characteristic_id.clone(),
        aspect_node: ctx.aspects.node_of(&variable.aspect_id),
        function_id: variable.function_id.clone(),
        value: value.clone(),
        value_type: variable.value_type.clone(),
    });
}

// =============================================================================
// TESTS
// =============================================================================
