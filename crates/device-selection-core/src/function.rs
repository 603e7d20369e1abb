//! # Function Index
//!
//! Resolves functions to their concept and the concept's characteristics,
//! and classifies functions as measuring or controlling by id prefix.

use crate::primitives::{CONTROLLING_FUNCTION_PREFIX, MEASURING_FUNCTION_PREFIX};
use crate::{Concept, Function};
use std::collections::{BTreeMap, BTreeSet};

/// Semantic class of a function, derived from its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Reads state; matched against service outputs.
    Measuring,
    /// Changes state; matched against service inputs.
    Controlling,
    /// Neither prefix; never matches.
    Unknown,
}

impl FunctionKind {
    #[must_use]
    pub fn of(function_id: &str) -> Self {
        if function_id.starts_with(MEASURING_FUNCTION_PREFIX) {
            Self::Measuring
        } else if function_id.starts_with(CONTROLLING_FUNCTION_PREFIX) {
            Self::Controlling
        } else {
            Self::Unknown
        }
    }
}

#[must_use]
pub fn is_measuring(function_id: &str) -> bool {
    FunctionKind::of(function_id) == FunctionKind::Measuring
}

#[must_use]
pub fn is_controlling(function_id: &str) -> bool {
    FunctionKind::of(function_id) == FunctionKind::Controlling
}

/// Immutable snapshot of functions and concepts.
#[derive(Debug, Clone, Default)]
pub struct FunctionIndex {
    functions: BTreeMap<String, Function>,
    characteristics: BTreeMap<String, BTreeSet<String>>,
}

impl FunctionIndex {
    #[must_use]
    pub fn build(functions: &[Function], concepts: &[Concept]) -> Self {
        let characteristics = concepts
            .iter()
            .map(|c| {
                let mut set: BTreeSet<String> = c.characteristic_ids.iter().cloned().collect();
                if !c.base_characteristic_id.is_empty() {
                    set.insert(c.base_characteristic_id.clone());
                }
                (c.id.clone(), set)
            })
            .collect();

        Self {
            functions: functions
                .iter()
                .map(|f| (f.id.clone(), f.clone()))
                .collect(),
            characteristics,
        }
    }

    #[must_use]
    pub fn contains(&self, function_id: &str) -> bool {
        self.functions.contains_key(function_id)
    }

    #[must_use]
    pub fn get(&self, function_id: &str) -> Option<&Function> {
        self.functions.get(function_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Characteristics reachable through the function's concept.
    ///
    /// Empty for unknown functions and functions without a concept.
    #[must_use]
    pub fn characteristics_of(&self, function_id: &str) -> BTreeSet<String> {
        self.functions
            .get(function_id)
            .and_then(|f| self.characteristics.get(&f.concept_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a variable of `characteristic_id` may carry `function_id`.
    ///
    /// Unset characteristics and functions whose concept lists none accept
    /// anything.
    #[must_use]
    pub fn accepts_characteristic(&self, function_id: &str, characteristic_id: &str) -> bool {
        if characteristic_id.is_empty() {
            return true;
        }
        let Some(set) = self
            .functions
            .get(function_id)
            .and_then(|f| self.characteristics.get(&f.concept_id))
        else {
            return true;
        };
        set.is_empty() || set.contains(characteristic_id)
    }
}

// =============================================================================
// TESTS
// =============================================================================
