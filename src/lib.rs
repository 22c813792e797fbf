//! poolshift - CRD-driven Kubernetes operator that moves workloads between node pools
//!
//! A `WorkloadMigration` lists procedures; each procedure names Deployments or
//! StatefulSets in one namespace together with the node affinity and/or node
//! selector value they should move from and to. The operator validates every
//! workload, then rewrites and waits for them one at a time.
//!
//! # Modules
//!
//! - [`crd`] - The WorkloadMigration Custom Resource Definition
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`pipeline`] - Validate, mutate and wait state machine
//! - [`scheduling`] - Node affinity / node selector inspection and rewriting
//! - [`readiness`] - Per-kind rollout readiness checks
//! - [`poll`] - Bounded, cancellable polling
//! - [`workload`] - Deployment / StatefulSet wrapper types
//! - [`client`] - Workload API access trait and kube implementation
//! - [`access`] - Authenticated clients for target clusters
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod access;
pub mod client;
pub mod controller;
pub mod crd;
pub mod error;
pub mod pipeline;
pub mod poll;
pub mod readiness;
pub mod scheduling;
pub mod telemetry;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
