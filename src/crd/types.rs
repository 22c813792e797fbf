//! Supporting types for the WorkloadMigration CRD

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::workload::{WorkloadKind, WorkloadRef};

/// Wait budget used when a procedure leaves `timeoutSeconds` unset or zero
pub const DEFAULT_PROCEDURE_TIMEOUT_SECS: u64 = 600;

/// Largest accepted `timeoutSeconds` (one day)
pub const MAX_PROCEDURE_TIMEOUT_SECS: u64 = 86_400;

/// How the operator authenticates against the target cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum CredentialMode {
    /// Cluster-admin credentials (kubeconfig context `<cluster>-admin`)
    #[default]
    AdminCredentials,
    /// Regular user credentials (kubeconfig context `<cluster>`)
    UserCredentials,
    /// Service-principal login through kubelogin
    CliLogin,
}

impl std::fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdminCredentials => write!(f, "AdminCredentials"),
            Self::UserCredentials => write!(f, "UserCredentials"),
            Self::CliLogin => write!(f, "CliLogin"),
        }
    }
}

/// A scheduling constraint value moving from `initial` to `target`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintChange {
    /// Node label key (e.g. `agentpool`)
    #[serde(default)]
    pub key: String,

    /// Value the workload is expected to carry before migration
    #[serde(default)]
    pub initial: String,

    /// Value written during migration
    #[serde(default)]
    pub target: String,
}

impl ConstraintChange {
    /// Create a new constraint change
    pub fn new(
        key: impl Into<String>,
        initial: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            initial: initial.into(),
            target: target.into(),
        }
    }

    /// A change with an empty key is treated as absent
    pub fn is_defined(&self) -> bool {
        !self.key.trim().is_empty()
    }
}

/// One migration step over an ordered list of workloads
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Procedure {
    /// Free-form description, only used in logs
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Kind of every workload in this procedure
    #[serde(alias = "type")]
    pub workload_type: WorkloadKind,

    /// Namespace of every workload in this procedure
    #[serde(default)]
    pub namespace: String,

    /// Workload names, migrated strictly in this order
    #[serde(default)]
    pub workloads: Vec<String>,

    /// Node affinity change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<ConstraintChange>,

    /// Node selector change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<ConstraintChange>,

    /// Readiness wait budget per workload, 0 or unset means 600
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    #[schemars(range(max = 86_400))]
    pub timeout_seconds: Option<u64>,
}

impl Procedure {
    /// Defined node affinity change, if any
    pub fn affinity_change(&self) -> Option<&ConstraintChange> {
        self.affinity.as_ref().filter(|c| c.is_defined())
    }

    /// Defined node selector change, if any
    pub fn selector_change(&self) -> Option<&ConstraintChange> {
        self.selector.as_ref().filter(|c| c.is_defined())
    }

    /// Effective readiness wait budget
    pub fn timeout(&self) -> Duration {
        match self.timeout_seconds {
            Some(secs) if secs > 0 => Duration::from_secs(secs.min(MAX_PROCEDURE_TIMEOUT_SECS)),
            _ => Duration::from_secs(DEFAULT_PROCEDURE_TIMEOUT_SECS),
        }
    }

    /// References for every workload in declared order
    pub fn workload_refs(&self) -> impl Iterator<Item = WorkloadRef> + '_ {
        self.workloads
            .iter()
            .map(|name| WorkloadRef::new(self.workload_type, self.namespace.clone(), name.clone()))
    }

    /// Label used in logs: the description, or the kind and namespace
    pub fn label(&self) -> String {
        if self.description.is_empty() {
            format!("{} in {}", self.workload_type, self.namespace)
        } else {
            self.description.clone()
        }
    }

    /// Static checks that need no cluster access
    pub fn validate(&self, index: usize) -> Result<(), crate::Error> {
        let target = format!("procedures[{index}]");
        if self.namespace.trim().is_empty() {
            return Err(crate::Error::validation_for(
                &target,
                "namespace must not be empty",
            ));
        }
        if self.workloads.is_empty() {
            return Err(crate::Error::validation_for(
                &target,
                "workloads must not be empty",
            ));
        }
        if self.workloads.iter().any(|w| w.trim().is_empty()) {
            return Err(crate::Error::validation_for(
                &target,
                "workload names must not be blank",
            ));
        }
        if self
            .timeout_seconds
            .is_some_and(|secs| secs > MAX_PROCEDURE_TIMEOUT_SECS)
        {
            return Err(crate::Error::validation_for(
                &target,
                format!("timeoutSeconds must not exceed {MAX_PROCEDURE_TIMEOUT_SECS}"),
            ));
        }
        if self.affinity_change().is_none() && self.selector_change().is_none() {
            return Err(crate::Error::validation_for(
                &target,
                "procedure must define an affinity or selector change with a key",
            ));
        }
        Ok(())
    }
}
