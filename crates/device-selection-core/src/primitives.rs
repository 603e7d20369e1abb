//! # Engine Primitives
//!
//! Fixed constants of the selection engine. They are compiled in and do not
//! change at runtime.

/// Id prefix of every measuring function.
pub const MEASURING_FUNCTION_PREFIX: &str = "urn:infai:ses:measuring-function:";

/// Id prefix of every controlling function.
pub const CONTROLLING_FUNCTION_PREFIX: &str = "urn:infai:ses:controlling-function:";

/// Separates a base id from its modifier suffix: `base$k=v`.
pub const MODIFIER_SEPARATOR: char = '$';

/// Modifier key that selects one service group of a device.
pub const SERVICE_GROUP_SELECTION: &str = "service_group_selection";

/// Separator between the segments of a path option.
pub const PATH_SEPARATOR: &str = ".";

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum number of criteria in one selection request.
pub const MAX_CRITERIA: usize = 64;

/// Maximum number of device ids in one group request.
pub const MAX_GROUP_DEVICE_IDS: usize = 1000;

/// Content trees deeper than this are not descended further.
///
/// Upstream data is external; this bounds recursion on malformed trees.
pub const MAX_CONTENT_DEPTH: usize = 64;
