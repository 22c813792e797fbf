//! Integration tests for the poolshift operator
//!
//! These tests require a Kubernetes cluster (kind) to run and tell the story
//! of how platform operators move real workloads between node pools.
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating and reading WorkloadMigration
//!   resources through the Kubernetes API
//!
//! - `migration_e2e`: Stories that run the migration pipeline against real
//!   Deployments and StatefulSets scheduled on a labelled kind node
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod crd_operations;
mod helpers;
mod migration_e2e;
