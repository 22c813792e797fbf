//! Node affinity and node selector inspection and rewriting
//!
//! Everything here is a pure function over a [`PodSpec`]; fetching and
//! persisting workloads is the pipeline's job.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, PodSpec,
};

use crate::crd::Procedure;

/// Node selector operator written by the mutator
pub const OPERATOR_IN: &str = "In";

// =============================================================================
// Inspection
// =============================================================================

/// True if the pod spec carries a node affinity with a required or preferred section
pub fn has_affinity(pod_spec: &PodSpec) -> bool {
    pod_spec
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
        .map(|na| {
            na.required_during_scheduling_ignored_during_execution
                .is_some()
                || na
                    .preferred_during_scheduling_ignored_during_execution
                    .is_some()
        })
        .unwrap_or(false)
}

/// True if the pod spec carries a non-empty node selector
pub fn has_selector(pod_spec: &PodSpec) -> bool {
    pod_spec
        .node_selector
        .as_ref()
        .map(|s| !s.is_empty())
        .unwrap_or(false)
}

/// True if some required match expression has `key` and permits `value`
pub fn matches_affinity(pod_spec: &PodSpec, key: &str, value: &str) -> bool {
    let Some(required) = pod_spec
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
        .and_then(|na| na.required_during_scheduling_ignored_during_execution.as_ref())
    else {
        return false;
    };

    required
        .node_selector_terms
        .iter()
        .flat_map(|term| term.match_expressions.iter().flatten())
        .filter(|expr| expr.key == key)
        .any(|expr| expr.values.iter().flatten().any(|v| v == value))
}

/// True if the node selector maps `key` to exactly `value`
pub fn matches_selector(pod_spec: &PodSpec, key: &str, value: &str) -> bool {
    pod_spec
        .node_selector
        .as_ref()
        .and_then(|s| s.get(key))
        .map(|v| v == value)
        .unwrap_or(false)
}

// =============================================================================
// Rewriting
// =============================================================================

/// Node affinity with a single required term `key In [value]`
pub fn node_affinity_for(key: &str, value: &str) -> NodeAffinity {
    NodeAffinity {
        required_during_scheduling_ignored_during_execution: Some(NodeSelector {
            node_selector_terms: vec![NodeSelectorTerm {
                match_expressions: Some(vec![NodeSelectorRequirement {
                    key: key.to_string(),
                    operator: OPERATOR_IN.to_string(),
                    values: Some(vec![value.to_string()]),
                }]),
                match_fields: None,
            }],
        }),
        preferred_during_scheduling_ignored_during_execution: None,
    }
}

/// Node selector mapping `key` to `value` and nothing else
pub fn node_selector_for(key: &str, value: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(key.to_string(), value.to_string())])
}

/// Which constraint kinds a rewrite touched
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rewrite {
    /// Node affinity was replaced
    pub affinity: bool,
    /// Node selector was replaced
    pub selector: bool,
}

impl Rewrite {
    /// True if nothing was rewritten
    pub fn is_empty(&self) -> bool {
        !self.affinity && !self.selector
    }
}

/// Replace each constraint kind the pod spec carries with the procedure's target
///
/// A kind is only rewritten when the pod spec already has it and the procedure
/// defines a change for it. Pod affinity and anti-affinity are left alone.
pub fn rewrite_constraints(pod_spec: &mut PodSpec, procedure: &Procedure) -> Rewrite {
    let mut rewrite = Rewrite::default();

    if has_affinity(pod_spec) {
        if let Some(change) = procedure.affinity_change() {
            pod_spec
                .affinity
                .get_or_insert_with(Affinity::default)
                .node_affinity = Some(node_affinity_for(&change.key, &change.target));
            rewrite.affinity = true;
        }
    }

    if has_selector(pod_spec) {
        if let Some(change) = procedure.selector_change() {
            pod_spec.node_selector = Some(node_selector_for(&change.key, &change.target));
            rewrite.selector = true;
        }
    }

    rewrite
}
