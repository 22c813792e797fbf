//! Workload types migrated by poolshift
//!
//! A migration only ever touches two kinds of replica-managed workload:
//! - Deployment: stateless replica sets, rolled by the deployment controller
//! - StatefulSet: ordered, stable-identity pods
//!
//! [`Workload`] wraps the typed k8s-openapi objects so the pipeline can read
//! and rewrite the pod template without scattering kind checks around.

use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::{Expression, Selector};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// WorkloadKind
// =============================================================================

/// Kind of workload a procedure migrates
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    /// apps/v1 Deployment
    #[default]
    #[serde(alias = "Deployment")]
    Deployment,
    /// apps/v1 StatefulSet
    #[serde(alias = "StatefulSet")]
    StatefulSet,
}

impl WorkloadKind {
    /// Lowercase kind name as used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::StatefulSet => "statefulset",
        }
    }
}

impl std::str::FromStr for WorkloadKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deployment" => Ok(Self::Deployment),
            "statefulset" => Ok(Self::StatefulSet),
            _ => Err(crate::Error::validation(format!(
                "invalid workload type: {s}, expected one of: deployment, statefulset"
            ))),
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// WorkloadRef
// =============================================================================

/// Identity of one workload inside a procedure
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkloadRef {
    /// Workload kind
    pub kind: WorkloadKind,
    /// Namespace the workload lives in
    pub namespace: String,
    /// Workload name
    pub name: String,
}

impl WorkloadRef {
    /// Create a new workload reference
    pub fn new(kind: WorkloadKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

// =============================================================================
// Workload
// =============================================================================

/// A fetched workload snapshot
#[derive(Clone, Debug, PartialEq)]
pub enum Workload {
    /// A Deployment snapshot
    Deployment(Deployment),
    /// A StatefulSet snapshot
    StatefulSet(StatefulSet),
}

impl Workload {
    /// Kind of this workload
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::Deployment(_) => WorkloadKind::Deployment,
            Self::StatefulSet(_) => WorkloadKind::StatefulSet,
        }
    }

    /// Workload name, empty if the object has none
    pub fn name(&self) -> &str {
        let meta = match self {
            Self::Deployment(d) => &d.metadata,
            Self::StatefulSet(s) => &s.metadata,
        };
        meta.name.as_deref().unwrap_or_default()
    }

    /// Workload namespace, empty if the object has none
    pub fn namespace(&self) -> &str {
        let meta = match self {
            Self::Deployment(d) => &d.metadata,
            Self::StatefulSet(s) => &s.metadata,
        };
        meta.namespace.as_deref().unwrap_or_default()
    }

    /// Reference identifying this workload
    pub fn reference(&self) -> WorkloadRef {
        WorkloadRef::new(self.kind(), self.namespace(), self.name())
    }

    /// Pod template spec, if the workload has one
    pub fn pod_spec(&self) -> Option<&PodSpec> {
        match self {
            Self::Deployment(d) => d.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            Self::StatefulSet(s) => s.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
        }
    }

    /// Mutable pod template spec, created empty when missing
    pub fn pod_spec_mut(&mut self) -> &mut PodSpec {
        match self {
            Self::Deployment(d) => d
                .spec
                .get_or_insert_with(Default::default)
                .template
                .spec
                .get_or_insert_with(Default::default),
            Self::StatefulSet(s) => s
                .spec
                .get_or_insert_with(Default::default)
                .template
                .spec
                .get_or_insert_with(Default::default),
        }
    }

    /// Label selector the workload uses to own its pods
    pub fn selector(&self) -> Option<&LabelSelector> {
        match self {
            Self::Deployment(d) => d.spec.as_ref().map(|s| &s.selector),
            Self::StatefulSet(s) => s.spec.as_ref().map(|s| &s.selector),
        }
    }

    /// Pod selector for list queries, `None` when it selects nothing
    ///
    /// Fails with [`Error::Validation`](crate::Error::Validation) when the
    /// selector carries an unknown operator or a set operator without values.
    pub fn pod_selector(&self) -> Result<Option<Selector>, crate::Error> {
        let Some(selector) = self.selector() else {
            return Ok(None);
        };
        let selector = to_selector(selector)
            .map_err(|msg| crate::Error::validation_for(self.reference(), msg))?;
        Ok((!selector.selects_all()).then_some(selector))
    }
}

/// Convert a LabelSelector into a kube [`Selector`]
///
/// `In` and `NotIn` with an empty value set are rejected along with anything
/// kube itself cannot parse.
pub fn to_selector(selector: &LabelSelector) -> Result<Selector, String> {
    let converted = Selector::try_from(selector.clone()).map_err(|e| e.to_string())?;
    let empty_set = converted.clone().into_iter().find_map(|expr| match expr {
        Expression::In(key, values) | Expression::NotIn(key, values) if values.is_empty() => {
            Some(key)
        }
        _ => None,
    });
    match empty_set {
        Some(key) => Err(format!("selector expression on {key} has no values")),
        None => Ok(converted),
    }
}
