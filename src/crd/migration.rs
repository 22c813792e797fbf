//! WorkloadMigration Custom Resource Definition
//!
//! A WorkloadMigration names a target cluster and an ordered list of
//! procedures. Each reconciliation runs the whole list from the top.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CredentialMode, Procedure};
use crate::access::ClusterRef;

/// Specification for a WorkloadMigration
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "poolshift.dev",
    version = "v1alpha1",
    kind = "WorkloadMigration",
    plural = "workloadmigrations",
    shortname = "wm",
    namespaced,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"TestMode","type":"boolean","jsonPath":".spec.testMode"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadMigrationSpec {
    /// Cloud subscription holding the target cluster
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subscription_id: String,

    /// Resource group holding the target cluster
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_group: String,

    /// Target cluster; empty means the cluster the operator runs in
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,

    /// How to authenticate against the target cluster
    #[serde(default)]
    pub credential_mode: CredentialMode,

    /// Requeue the whole migration when a pass fails
    #[serde(default)]
    pub retry_on_error: bool,

    /// Log intended changes without writing or waiting
    #[serde(default)]
    pub test_mode: bool,

    /// Procedures, executed strictly in order
    #[serde(default)]
    pub procedures: Vec<Procedure>,
}

impl WorkloadMigrationSpec {
    /// Cluster this migration targets
    pub fn cluster_ref(&self) -> ClusterRef {
        ClusterRef {
            subscription_id: self.subscription_id.clone(),
            resource_group: self.resource_group.clone(),
            cluster_name: self.cluster_name.clone(),
            credential_mode: self.credential_mode,
        }
    }

    /// Total number of (procedure, workload) steps
    pub fn step_count(&self) -> usize {
        self.procedures.iter().map(|p| p.workloads.len()).sum()
    }

    /// Validate the migration specification without touching the cluster
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.procedures.is_empty() {
            return Err(crate::Error::validation("procedures must not be empty"));
        }
        for (index, procedure) in self.procedures.iter().enumerate() {
            procedure.validate(index)?;
        }
        Ok(())
    }
}
