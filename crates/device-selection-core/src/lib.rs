//! # device-selection-core
//!
//! The deterministic selection engine: decides which device services,
//! device groups and imports satisfy a set of semantic filter criteria.
//!
//! ## Pipeline
//!
//! ```text
//! criteria ─► matcher (aspect index, function index, interaction lattice)
//!          ─► path expander (dotted paths, configurables)
//!          ─► service-group modifier (virtual devices via id modifiers)
//!          ─► selection (AND across criteria, dedup, order)
//! ```
//!
//! ## Architectural Constraints
//!
//! - No async, no network: callers fetch the catalog and pass it in
//! - Deterministic: `BTreeMap`/`BTreeSet` wherever order reaches output
//! - "No match" is an empty result, never an error

// =============================================================================
// MODULES
// =============================================================================

pub mod aspect;
pub mod function;
pub mod group_usability;
pub mod idmodifier;
pub mod interaction;
pub mod matcher;
pub mod paths;
pub mod primitives;
pub mod selection;
pub mod service_group;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Aspect, AspectNode, Concept, Configurable, Content, ContentVariable, Device, DeviceGroup,
    DeviceGroupFilterCriterion, DeviceType, FilterCriterion, Function, Import, ImportType,
    PathOption, Selectable, SelectableKey, SelectionError, Service, ServiceGroup,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use aspect::AspectIndex;
pub use function::{FunctionIndex, FunctionKind};
pub use group_usability::{CriteriaSet, GroupHelperOption, GroupHelperResult, group_helper};
pub use idmodifier::ModifierParams;
pub use interaction::Interaction;
pub use matcher::MatchContext;
pub use selection::{SelectionOptions, finalize, validate_criteria};
