//! Error types for the poolshift operator
//!
//! Errors carry the workload or cluster they concern so a failed reconciliation
//! can be diagnosed from the log line alone. Every variant except `Cancelled`
//! aborts the current reconciliation; whether it is retried is decided by the
//! controller's error policy, never here.

use thiserror::Error;

use crate::workload::WorkloadRef;

/// Main error type for poolshift operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error that has no more specific mapping
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Acquiring an authenticated client for the target cluster failed
    #[error("credential error for cluster {cluster}: {message}")]
    Credential {
        /// Cluster the client was requested for
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// A named workload or pod does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Resource kind (deployment, statefulset, pod)
        kind: String,
        /// Namespace that was searched
        namespace: String,
        /// Name that was requested
        name: String,
    },

    /// A migration spec or workload is not in a state the pipeline accepts
    #[error("validation error for {target}: {message}")]
    Validation {
        /// What was being validated (a workload ref or the migration name)
        target: String,
        /// Description of what's invalid
        message: String,
    },

    /// Persisting a rewritten workload was rejected by the API server
    #[error("update error for {workload}: {message}")]
    Update {
        /// Workload whose update failed
        workload: String,
        /// Description of the rejection
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// The pipeline was interrupted by shutdown
    #[error("migration cancelled")]
    Cancelled,

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Where the error occurred
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a validation error without a specific target
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            target: "spec".to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a specific target
    pub fn validation_for(target: impl ToString, msg: impl Into<String>) -> Self {
        Self::Validation {
            target: target.to_string(),
            message: msg.into(),
        }
    }

    /// The fatal error raised when a workload carries neither node affinity nor node selector
    pub fn missing_constraint(workload: &WorkloadRef) -> Self {
        Self::validation_for(workload, "missing scheduling constraint")
    }

    /// Create a credential error for the given cluster
    pub fn credential(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Credential {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create an update error for a workload
    pub fn update(workload: &WorkloadRef, msg: impl Into<String>) -> Self {
        Self::Update {
            workload: workload.to_string(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Returns true if a kube error is an HTTP 404 from the API server
    pub fn is_kube_not_found(err: &kube::Error) -> bool {
        matches!(err, kube::Error::Api(resp) if resp.code == 404)
    }

    /// True when the cluster rejected or never issued our credentials
    ///
    /// Covers [`Error::Credential`] and API responses 401 and 403. A cached
    /// client that produced one of these should not be reused.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Credential { .. } => true,
            Self::Kube {
                source: kube::Error::Api(resp),
            } => matches!(resp.code, 401 | 403),
            _ => false,
        }
    }
}
