//! Controller for WorkloadMigration resources
//!
//! [`run`] watches WorkloadMigrations and hands each change to [`reconcile`].

mod migration;

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::{debug, error, info};

use crate::crd::WorkloadMigration;

pub use migration::{error_policy, reconcile, Context, ContextBuilder, DEFAULT_RETRY_DELAY};

/// Run the controller until shutdown
///
/// Watches one namespace when given, otherwise the whole cluster.
pub async fn run(client: Client, namespace: Option<&str>, ctx: Arc<Context>) {
    let migrations: Api<WorkloadMigration> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    info!(
        namespace = namespace.unwrap_or("<all>"),
        "starting WorkloadMigration controller"
    );
    Controller::new(migrations, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    debug!(?action, "migration reconciliation completed");
                }
                Err(e) => {
                    error!(error = ?e, "migration reconciliation error");
                }
            }
        })
        .await;
    info!("WorkloadMigration controller stopped");
}
