//! Mutation and readiness wait

use tracing::{info, instrument, warn};

use super::{MigrationPipeline, MigrationReport, ProcedureScope, StepState};
use crate::crd::Procedure;
use crate::poll::{wait_until, WaitOutcome};
use crate::readiness;
use crate::scheduling::{self, Rewrite};
use crate::workload::{Workload, WorkloadRef};
use crate::Error;

/// Rewrite a workload's scheduling constraints in place
///
/// Fails if the workload carries neither constraint kind. A kind that is
/// present but has no change defined in the procedure is left alone with a
/// warning; the returned [`Rewrite`] is empty when nothing was changed.
pub fn plan_rewrite(workload: &mut Workload, procedure: &Procedure) -> Result<Rewrite, Error> {
    let target = workload.reference();
    let (has_affinity, has_selector) = match workload.pod_spec() {
        Some(spec) => (
            scheduling::has_affinity(spec),
            scheduling::has_selector(spec),
        ),
        None => (false, false),
    };
    if !has_affinity && !has_selector {
        return Err(Error::missing_constraint(&target));
    }

    let rewrite = scheduling::rewrite_constraints(workload.pod_spec_mut(), procedure);

    if has_affinity && !rewrite.affinity {
        warn!(workload = %target, "node affinity present but no affinity change defined, leaving it");
    }
    if has_selector && !rewrite.selector {
        warn!(workload = %target, "node selector present but no selector change defined, leaving it");
    }
    Ok(rewrite)
}

/// Log what test mode would change and mark every workload skipped
#[instrument(skip_all, fields(procedure = scope.index, label = %scope.procedure.label()))]
pub(super) fn preview_procedure(scope: &ProcedureScope<'_>, report: &mut MigrationReport) {
    for target in scope.procedure.workload_refs() {
        if let Some(change) = scope.procedure.affinity_change() {
            info!(
                workload = %target,
                key = %change.key,
                from = %change.initial,
                to = %change.target,
                "test mode: would set node affinity"
            );
        }
        if let Some(change) = scope.procedure.selector_change() {
            info!(
                workload = %target,
                key = %change.key,
                from = %change.initial,
                to = %change.target,
                "test mode: would set node selector"
            );
        }
        report.record(scope.index, &target, StepState::Skipped);
    }
}

/// Mutate each workload of a procedure and wait for it before moving on
#[instrument(
    skip_all,
    fields(phase = "apply", procedure = scope.index, label = %scope.procedure.label(), timeout = ?scope.procedure.timeout())
)]
pub(super) async fn apply_procedure(
    scope: &ProcedureScope<'_>,
    pipeline: &MigrationPipeline,
    report: &mut MigrationReport,
) -> Result<(), Error> {
    for target in scope.procedure.workload_refs() {
        if pipeline.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match mutate(scope, &target).await {
            Ok(rewrite) if rewrite.is_empty() => {
                report.record(scope.index, &target, StepState::Skipped);
                continue;
            }
            Ok(rewrite) => {
                info!(
                    workload = %target,
                    affinity = rewrite.affinity,
                    selector = rewrite.selector,
                    "workload updated"
                );
                report.record(scope.index, &target, StepState::Mutated);
            }
            Err(e) => {
                warn!(workload = %target, phase = "apply", error = %e, "mutation failed");
                report.record(scope.index, &target, StepState::Failed);
                return Err(e);
            }
        }

        report.record(scope.index, &target, StepState::AwaitingReady);
        let state = await_ready(scope, pipeline, &target).await?;
        report.record(scope.index, &target, state);
    }
    Ok(())
}

/// Fetch, rewrite and persist one workload
async fn mutate(scope: &ProcedureScope<'_>, target: &WorkloadRef) -> Result<Rewrite, Error> {
    let mut workload = scope
        .client
        .get_workload(target.kind, &target.namespace, &target.name)
        .await?;

    let rewrite = plan_rewrite(&mut workload, scope.procedure)?;
    if rewrite.is_empty() {
        warn!(workload = %target, "nothing to rewrite, skipping");
        return Ok(rewrite);
    }

    scope.client.update_workload(&workload).await?;
    Ok(rewrite)
}

/// Poll readiness until ready, timed out, or cancelled
async fn await_ready(
    scope: &ProcedureScope<'_>,
    pipeline: &MigrationPipeline,
    target: &WorkloadRef,
) -> Result<StepState, Error> {
    let client = scope.client;
    let outcome = wait_until(
        pipeline.poll_interval,
        scope.procedure.timeout(),
        &pipeline.cancel,
        || async move {
            match readiness::probe(client, target).await {
                Ok(ready) => ready,
                Err(e) => {
                    warn!(workload = %target, error = %e, "readiness check failed");
                    false
                }
            }
        },
    )
    .await;

    match outcome {
        WaitOutcome::Ready => {
            info!(workload = %target, "workload ready");
            Ok(StepState::Ready)
        }
        WaitOutcome::TimedOut => {
            warn!(
                workload = %target,
                timeout = ?scope.procedure.timeout(),
                "workload not ready within timeout, continuing"
            );
            Ok(StepState::TimedOut)
        }
        WaitOutcome::Cancelled => Err(Error::Cancelled),
    }
}
