//! # Aspect Hierarchy Index
//!
//! Materializes ancestors and descendants of every node of the aspect
//! forest so that subtree questions are map lookups.
//!
//! The index is immutable once built. Callers that need fresh data build a
//! new index and swap the handle.

use crate::primitives::MAX_CONTENT_DEPTH;
use crate::{Aspect, AspectNode};
use std::collections::{BTreeMap, BTreeSet};

/// Immutable snapshot of the aspect forest.
#[derive(Debug, Clone, Default)]
pub struct AspectIndex {
    nodes: BTreeMap<String, AspectNode>,
}

impl AspectIndex {
    /// Build the index from the raw forest.
    ///
    /// Duplicate ids keep their first occurrence; their subtrees are skipped.
    #[must_use]
    pub fn build(forest: &[Aspect]) -> Self {
        let mut nodes = BTreeMap::new();
        for root in forest {
            let mut ancestors = Vec::new();
            Self::visit(root, &root.id, &mut ancestors, &mut nodes);
        }

        // Descendants: every node registers itself with each of its ancestors.
        let mut descendants: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for node in nodes.values() {
            for ancestor in &node.ancestor_ids {
                descendants
                    .entry(ancestor.clone())
                    .or_default()
                    .insert(node.id.clone());
            }
        }
        for (id, set) in descendants {
            if let Some(node) = nodes.get_mut(&id) {
                node.descendent_ids = set.into_iter().collect();
            }
        }

        Self { nodes }
    }

    fn visit(
        aspect: &Aspect,
        root_id: &str,
        ancestors: &mut Vec<String>,
        nodes: &mut BTreeMap<String, AspectNode>,
    ) {
        if aspect.id.is_empty() || nodes.contains_key(&aspect.id) {
            return;
        }
        if ancestors.len() >= MAX_CONTENT_DEPTH {
            return;
        }

        let node = AspectNode {
            id: aspect.id.clone(),
            name: aspect.name.clone(),
            root_id: root_id.to_string(),
            parent_id: ancestors.last().cloned().unwrap_or_default(),
            child_ids: aspect.sub_aspects.iter().map(|c| c.id.clone()).collect(),
            ancestor_ids: ancestors.clone(),
            descendent_ids: Vec::new(),
        };
        nodes.insert(aspect.id.clone(), node);

        ancestors.push(aspect.id.clone());
        for child in &aspect.sub_aspects {
            Self::visit(child, root_id, ancestors, nodes);
        }
        ancestors.pop();
    }

    /// Number of indexed aspects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&AspectNode> {
        self.nodes.get(id)
    }

    /// The node for `id`, or the empty node when unknown or unset.
    #[must_use]
    pub fn node_of(&self, id: &str) -> AspectNode {
        self.nodes.get(id).cloned().unwrap_or_default()
    }

    /// Descendants of `id`, sorted. Empty for unknown ids.
    #[must_use]
    pub fn descendants(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|n| n.descendent_ids.as_slice())
            .unwrap_or(&[])
    }

    /// Ancestors of `id`, root first. Empty for unknown ids.
    #[must_use]
    pub fn ancestors(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|n| n.ancestor_ids.as_slice())
            .unwrap_or(&[])
    }

    /// True iff `candidate == root` or `candidate` is a descendant of `root`.
    ///
    /// Only known aspects are in any subtree.
    #[must_use]
    pub fn is_in_subtree(&self, candidate: &str, root: &str) -> bool {
        match self.nodes.get(candidate) {
            Some(node) => node.id == root || node.ancestor_ids.iter().any(|a| a == root),
            None => false,
        }
    }

    /// True iff `candidate` is a strict ancestor of `of`.
    #[must_use]
    pub fn is_ancestor(&self, candidate: &str, of: &str) -> bool {
        self.ancestors(of).iter().any(|a| a == candidate)
    }

    /// True iff one of the two aspects lies in the subtree of the other.
    #[must_use]
    pub fn on_same_branch(&self, a: &str, b: &str) -> bool {
        self.is_in_subtree(a, b) || self.is_in_subtree(b, a)
    }
}

// =============================================================================
// TESTS
// =============================================================================
