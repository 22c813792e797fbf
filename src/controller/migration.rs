//! WorkloadMigration controller implementation
//!
//! Every reconciliation runs the full procedure list from the top. Nothing is
//! written back to the resource: progress lives only in the logged report.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::access::{CachedClusterAccess, ClusterAccess, ClusterRef, KubeconfigAccess};
use crate::crd::WorkloadMigration;
use crate::pipeline::{MigrationPipeline, MigrationReport};
use crate::poll::DEFAULT_POLL_INTERVAL;
use crate::Error;

/// Default delay before a failed migration is retried
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Controller context shared by all reconciliations
pub struct Context {
    /// Provider of clients for target clusters
    pub access: Arc<dyn ClusterAccess>,
    /// Interval between readiness checks
    pub poll_interval: Duration,
    /// Requeue delay for failed migrations with `retryOnError`
    pub retry_delay: Duration,
    /// Cancelled on shutdown; aborts in-flight readiness waits
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }
}

/// Builder for [`Context`]
///
/// ```text
/// let ctx = Context::builder()
///     .poll_interval(Duration::from_secs(5))
///     .shutdown(token)
///     .build();
/// ```
#[derive(Default)]
pub struct ContextBuilder {
    access: Option<Arc<dyn ClusterAccess>>,
    poll_interval: Option<Duration>,
    retry_delay: Option<Duration>,
    shutdown: Option<CancellationToken>,
}

impl ContextBuilder {
    /// Override the cluster access provider (primarily for testing)
    pub fn access(mut self, access: Arc<dyn ClusterAccess>) -> Self {
        self.access = Some(access);
        self
    }

    /// Set the readiness poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Set the retry delay for failed migrations
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Set the shutdown token
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Build the Context
    ///
    /// Without an explicit provider, clients come from the local kubeconfig
    /// and are cached per cluster.
    pub fn build(self) -> Context {
        Context {
            access: self
                .access
                .unwrap_or_else(|| Arc::new(CachedClusterAccess::new(KubeconfigAccess::new()))),
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            retry_delay: self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY),
            shutdown: self.shutdown.unwrap_or_default(),
        }
    }
}

/// Reconcile a WorkloadMigration
///
/// Invalid specs are logged and left until they change. Otherwise the whole
/// migration runs once; on success the controller waits for the next change.
#[instrument(
    skip(migration, ctx),
    fields(migration = %migration.name_any(), namespace = %migration.namespace().unwrap_or_default())
)]
pub async fn reconcile(
    migration: Arc<WorkloadMigration>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    info!("reconciling workload migration");

    if let Err(e) = migration.spec.validate() {
        warn!(error = %e, "workload migration is invalid");
        // Don't requeue for validation errors - they require spec changes
        return Ok(Action::await_change());
    }

    let cluster = migration.spec.cluster_ref();
    if let Err(e) = migrate(&migration, &ctx, &cluster).await {
        if e.is_auth_failure() {
            warn!(cluster = %cluster, error = %e, "dropping cached client after authentication failure");
            ctx.access.evict(&cluster).await;
        }
        return Err(e);
    }

    info!(cluster = %cluster, "workload migration complete");
    Ok(Action::await_change())
}

/// Acquire a client for `cluster` and run every procedure of the migration
async fn migrate(
    migration: &WorkloadMigration,
    ctx: &Context,
    cluster: &ClusterRef,
) -> Result<(), Error> {
    let client = ctx.access.client_for(cluster).await?;

    let pipeline = MigrationPipeline::new(client, ctx.shutdown.child_token())
        .with_poll_interval(ctx.poll_interval);
    let mut report = MigrationReport::new();
    let result = pipeline.run(&migration.spec, &mut report).await;
    report.log_summary();
    result
}

/// Decide what happens after a failed reconciliation
///
/// Migrations with `retryOnError` are requeued after the context's retry
/// delay; everything else waits for a spec change. Shutdown is never retried.
pub fn error_policy(migration: Arc<WorkloadMigration>, error: &Error, ctx: Arc<Context>) -> Action {
    if matches!(error, Error::Cancelled) {
        info!(migration = %migration.name_any(), "migration interrupted by shutdown");
        return Action::await_change();
    }

    error!(
        ?error,
        migration = %migration.name_any(),
        retry = migration.spec.retry_on_error,
        "reconciliation failed"
    );

    if migration.spec.retry_on_error {
        Action::requeue(ctx.retry_delay)
    } else {
        Action::await_change()
    }
}
