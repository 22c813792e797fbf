//! Custom Resource Definitions for poolshift
//!
//! This module contains the WorkloadMigration CRD and the procedure types it carries.

mod migration;
mod types;

pub use migration::{WorkloadMigration, WorkloadMigrationSpec};
pub use types::{
    ConstraintChange, CredentialMode, Procedure, DEFAULT_PROCEDURE_TIMEOUT_SECS,
    MAX_PROCEDURE_TIMEOUT_SECS,
};
