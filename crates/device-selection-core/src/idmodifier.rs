//! # Id Modifier Codec
//!
//! Virtual devices are addressed by decorating a stored id with a modifier
//! suffix: `base$k1=v1,v2&k2=v3`. Keys are sorted, keys and values are
//! percent-encoded. Storage only ever sees the base; the suffix is applied
//! when results are emitted.

use crate::SelectionError;
use crate::primitives::{MODIFIER_SEPARATOR, SERVICE_GROUP_SELECTION};
use std::collections::BTreeMap;

/// Modifier parameters: key → values.
pub type ModifierParams = BTreeMap<String, Vec<String>>;

/// Append `params` to `base`. Empty params return `base` unchanged.
#[must_use]
pub fn encode(base: &str, params: &ModifierParams) -> String {
    if params.is_empty() {
        return base.to_string();
    }
    let suffix = params
        .iter()
        .map(|(key, values)| {
            let values: Vec<String> = values
                .iter()
                .map(|v| urlencoding::encode(v).into_owned())
                .collect();
            format!("{}={}", urlencoding::encode(key), values.join(","))
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("{}{}{}", base, MODIFIER_SEPARATOR, suffix)
}

/// Split an id into its base and modifier parameters.
///
/// Splits on the first `$`. An id without `$` has no parameters.
pub fn parse(id: &str) -> Result<(String, ModifierParams), SelectionError> {
    let Some((base, suffix)) = id.split_once(MODIFIER_SEPARATOR) else {
        return Ok((id.to_string(), ModifierParams::new()));
    };

    let mut params = ModifierParams::new();
    for pair in suffix.split('&').filter(|p| !p.is_empty()) {
        let (key, raw_values) = pair.split_once('=').ok_or_else(|| {
            SelectionError::BadRequest(format!("malformed id modifier '{}' in '{}'", pair, id))
        })?;
        let key = decode(key, id)?;
        let values = raw_values
            .split(',')
            .map(|v| decode(v, id))
            .collect::<Result<Vec<_>, _>>()?;
        params.entry(key).or_default().extend(values);
    }
    Ok((base.to_string(), params))
}

fn decode(raw: &str, id: &str) -> Result<String, SelectionError> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|e| SelectionError::BadRequest(format!("invalid encoding in id '{}': {}", id, e)))
}

/// The base of an id, without parsing the suffix.
#[must_use]
pub fn strip(id: &str) -> &str {
    id.split_once(MODIFIER_SEPARATOR)
        .map(|(base, _)| base)
        .unwrap_or(id)
}

/// True when the id carries a modifier suffix.
#[must_use]
pub fn is_modified(id: &str) -> bool {
    id.contains(MODIFIER_SEPARATOR)
}

/// The selected service group, if the parameters name exactly one.
#[must_use]
pub fn service_group_selection(params: &ModifierParams) -> Option<&str> {
    match params.get(SERVICE_GROUP_SELECTION).map(Vec::as_slice) {
        Some([key]) => Some(key.as_str()),
        _ => None,
    }
}

/// `base$service_group_selection=KEY`.
#[must_use]
pub fn with_service_group(base: &str, key: &str) -> String {
    let mut params = ModifierParams::new();
    params.insert(SERVICE_GROUP_SELECTION.to_string(), vec![key.to_string()]);
    encode(base, &params)
}

// =============================================================================
// TESTS
// =============================================================================
