//! Pre-mutation validation
//!
//! Absence of every scheduling constraint is fatal. A constraint whose value
//! differs from the procedure's `initial` is only reported, so a re-run after
//! a partial migration warns about the workloads it already moved.

use std::fmt;

use tracing::{debug, instrument, warn};

use super::{MigrationReport, ProcedureScope, StepState};
use crate::crd::Procedure;
use crate::scheduling;
use crate::workload::Workload;
use crate::Error;

/// The two scheduling constraint kinds the engine manages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// `affinity.nodeAffinity`
    Affinity,
    /// `nodeSelector`
    Selector,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Affinity => f.write_str("node affinity"),
            Self::Selector => f.write_str("node selector"),
        }
    }
}

/// A present constraint that doesn't carry the expected initial value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mismatch {
    /// Which constraint
    pub kind: ConstraintKind,
    /// Label key that was checked
    pub key: String,
    /// Value the procedure expected
    pub expected: String,
}

/// Check a workload's constraints against a procedure
///
/// Returns [`Error::Validation`] if the workload has neither node affinity nor
/// node selector, or if its pod selector cannot be used for a readiness query.
/// Otherwise returns every present, managed constraint whose value differs
/// from the expected initial value.
pub fn check_constraints(
    workload: &Workload,
    procedure: &Procedure,
) -> Result<Vec<Mismatch>, Error> {
    workload.pod_selector()?;

    let Some(pod_spec) = workload.pod_spec() else {
        return Err(Error::missing_constraint(&workload.reference()));
    };

    let has_affinity = scheduling::has_affinity(pod_spec);
    let has_selector = scheduling::has_selector(pod_spec);
    if !has_affinity && !has_selector {
        return Err(Error::missing_constraint(&workload.reference()));
    }

    let mut mismatches = Vec::new();
    if has_affinity {
        if let Some(change) = procedure.affinity_change() {
            if !scheduling::matches_affinity(pod_spec, &change.key, &change.initial) {
                mismatches.push(Mismatch {
                    kind: ConstraintKind::Affinity,
                    key: change.key.clone(),
                    expected: change.initial.clone(),
                });
            }
        }
    }
    if has_selector {
        if let Some(change) = procedure.selector_change() {
            if !scheduling::matches_selector(pod_spec, &change.key, &change.initial) {
                mismatches.push(Mismatch {
                    kind: ConstraintKind::Selector,
                    key: change.key.clone(),
                    expected: change.initial.clone(),
                });
            }
        }
    }
    Ok(mismatches)
}

/// Validate every workload of one procedure, stopping at the first fatal error
#[instrument(
    skip_all,
    fields(phase = "validate", procedure = scope.index, kind = %scope.kind(), namespace = scope.namespace())
)]
pub(super) async fn validate_procedure(
    scope: &ProcedureScope<'_>,
    report: &mut MigrationReport,
) -> Result<(), Error> {
    for target in scope.procedure.workload_refs() {
        report.record(scope.index, &target, StepState::Pending);

        let checked = match scope
            .client
            .get_workload(target.kind, &target.namespace, &target.name)
            .await
        {
            Ok(workload) => check_constraints(&workload, scope.procedure),
            Err(e) => Err(e),
        };

        let mismatches = match checked {
            Ok(m) => m,
            Err(e) => {
                report.record(scope.index, &target, StepState::Failed);
                return Err(e);
            }
        };

        for m in &mismatches {
            warn!(
                workload = %target,
                constraint = %m.kind,
                key = %m.key,
                expected = %m.expected,
                "constraint does not match expected initial value, continuing"
            );
        }
        debug!(workload = %target, "validated");
        report.record(scope.index, &target, StepState::Validated);
    }
    Ok(())
}
