//! Procedure execution engine
//!
//! A pass over a [`WorkloadMigrationSpec`] runs in two phases:
//!
//! 1. **Validate** every (procedure, workload) pair against the cluster. A
//!    workload with no node affinity and no node selector aborts the pass; a
//!    constraint whose value differs from the expected initial value only
//!    produces a warning.
//! 2. **Apply** each procedure in order. Each workload is rewritten, persisted,
//!    and then polled for readiness before the next one is touched. In test
//!    mode the intended change is logged instead.
//!
//! Each step moves strictly forward:
//!
//! ```text
//! Pending -> Validated -> Skipped
//!                      -> Mutated -> AwaitingReady -> Ready | TimedOut
//! ```
//!
//! A readiness timeout completes the step like `Ready` does. Nothing is
//! persisted between passes; a re-run starts again from `Pending`.

mod apply;
mod validate;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::client::WorkloadClient;
use crate::crd::{Procedure, WorkloadMigrationSpec};
use crate::poll::{DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL};
use crate::workload::{WorkloadKind, WorkloadRef};
use crate::Error;

pub use apply::plan_rewrite;
pub use validate::{check_constraints, ConstraintKind, Mismatch};

/// Where a single (procedure, workload) step stands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepState {
    /// Not looked at yet
    Pending,
    /// Fetched and found to carry a scheduling constraint
    Validated,
    /// Left unchanged (test mode, or nothing the procedure manages)
    Skipped,
    /// Rewritten and persisted
    Mutated,
    /// Waiting for the rollout to converge
    AwaitingReady,
    /// Rollout converged within the wait budget
    Ready,
    /// Wait budget ran out; still counts as completed
    TimedOut,
    /// Validation or update failed and the pass was aborted
    Failed,
}

impl StepState {
    /// True for states that end a step without aborting the pass
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Skipped | Self::Ready | Self::TimedOut)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Validated => "Validated",
            Self::Skipped => "Skipped",
            Self::Mutated => "Mutated",
            Self::AwaitingReady => "AwaitingReady",
            Self::Ready => "Ready",
            Self::TimedOut => "TimedOut",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// One step of a pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepRecord {
    /// Index of the procedure in the migration spec
    pub procedure: usize,
    /// Workload the step concerns
    pub workload: WorkloadRef,
    /// Latest state
    pub state: StepState,
}

/// In-memory record of one pass, in execution order
///
/// The caller owns the report, so it still holds everything that happened
/// when the pass fails.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    steps: Vec<StepRecord>,
}

impl MigrationReport {
    /// Empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the state of a step, adding it if it hasn't been seen
    pub fn record(&mut self, procedure: usize, workload: &WorkloadRef, state: StepState) {
        match self
            .steps
            .iter_mut()
            .find(|s| s.procedure == procedure && &s.workload == workload)
        {
            Some(step) => step.state = state,
            None => self.steps.push(StepRecord {
                procedure,
                workload: workload.clone(),
                state,
            }),
        }
    }

    /// Current state of a step
    pub fn state(&self, procedure: usize, workload: &WorkloadRef) -> Option<StepState> {
        self.steps
            .iter()
            .find(|s| s.procedure == procedure && &s.workload == workload)
            .map(|s| s.state)
    }

    /// All steps in the order they were first seen
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Number of steps currently in `state`
    pub fn count(&self, state: StepState) -> usize {
        self.steps.iter().filter(|s| s.state == state).count()
    }

    /// Log one line per step plus totals
    pub fn log_summary(&self) {
        for step in &self.steps {
            info!(
                procedure = step.procedure,
                workload = %step.workload,
                state = %step.state,
                "migration step"
            );
        }
        info!(
            steps = self.steps.len(),
            ready = self.count(StepState::Ready),
            timed_out = self.count(StepState::TimedOut),
            skipped = self.count(StepState::Skipped),
            failed = self.count(StepState::Failed),
            "migration pass summary"
        );
    }
}

/// Everything a phase needs to work on one procedure
#[derive(Clone, Copy)]
pub struct ProcedureScope<'a> {
    /// Client for the target cluster
    pub client: &'a dyn WorkloadClient,
    /// Position of the procedure in the migration spec
    pub index: usize,
    /// The procedure itself
    pub procedure: &'a Procedure,
}

impl<'a> ProcedureScope<'a> {
    /// Kind of every workload in the procedure
    pub fn kind(&self) -> WorkloadKind {
        self.procedure.workload_type
    }

    /// Namespace of every workload in the procedure
    pub fn namespace(&self) -> &'a str {
        &self.procedure.namespace
    }
}

/// Runs migration passes against one cluster
#[derive(Clone)]
pub struct MigrationPipeline {
    client: Arc<dyn WorkloadClient>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl MigrationPipeline {
    /// Pipeline polling every [`DEFAULT_POLL_INTERVAL`]
    pub fn new(client: Arc<dyn WorkloadClient>, cancel: CancellationToken) -> Self {
        Self {
            client,
            cancel,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the readiness poll interval, never below [`MIN_POLL_INTERVAL`]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    fn scope<'a>(&'a self, index: usize, procedure: &'a Procedure) -> ProcedureScope<'a> {
        ProcedureScope {
            client: self.client.as_ref(),
            index,
            procedure,
        }
    }

    /// Validate everything, then apply every procedure in order
    ///
    /// Returns the first fatal error. Steps that completed before it keep
    /// their state in `report`; nothing is rolled back.
    #[instrument(
        skip_all,
        fields(procedures = spec.procedures.len(), steps = spec.step_count(), test_mode = spec.test_mode)
    )]
    pub async fn run(
        &self,
        spec: &WorkloadMigrationSpec,
        report: &mut MigrationReport,
    ) -> Result<(), Error> {
        for (index, procedure) in spec.procedures.iter().enumerate() {
            validate::validate_procedure(&self.scope(index, procedure), report).await?;
        }
        info!("validation complete");

        for (index, procedure) in spec.procedures.iter().enumerate() {
            let scope = self.scope(index, procedure);
            if spec.test_mode {
                apply::preview_procedure(&scope, report);
            } else {
                apply::apply_procedure(&scope, self, report).await?;
            }
        }
        info!("migration pass complete");
        Ok(())
    }
}
