//! Rollout readiness per workload kind
//!
//! - Deployment: the first pod matching the deployment's selector reports `Ready=True`
//! - StatefulSet: no matching pod is terminating and every desired replica is ready
//!
//! Both probes re-read the workload from the cluster on every call so each
//! poll tick sees the latest state.

use chrono::Utc;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, info};

use crate::client::WorkloadClient;
use crate::workload::{Workload, WorkloadKind, WorkloadRef};
use crate::Error;

/// Condition type a running pod reports once it passes readiness checks
pub const CONDITION_READY: &str = "Ready";

/// Condition status meaning the condition holds
pub const STATUS_TRUE: &str = "True";

/// Check whether the workload's current rollout has converged
pub async fn probe(client: &dyn WorkloadClient, target: &WorkloadRef) -> Result<bool, Error> {
    match target.kind {
        WorkloadKind::Deployment => deployment_ready(client, target).await,
        WorkloadKind::StatefulSet => statefulset_ready(client, target).await,
    }
}

/// Deployment readiness: the first pod the selector returns must be Ready
///
/// The list order is whatever the API server returns. A deployment whose
/// selector matches no pod is simply not ready yet.
async fn deployment_ready(client: &dyn WorkloadClient, target: &WorkloadRef) -> Result<bool, Error> {
    let workload = client
        .get_workload(WorkloadKind::Deployment, &target.namespace, &target.name)
        .await?;

    let Some(selector) = workload.pod_selector()? else {
        debug!(workload = %target, "deployment has an empty selector, treating as not ready");
        return Ok(false);
    };

    let pods = client.list_pods(&target.namespace, &selector).await?;
    let Some(first) = pods.first().and_then(|p| p.metadata.name.as_deref()) else {
        debug!(workload = %target, selector = %selector, "no pods match yet");
        return Ok(false);
    };

    let pod = client.get_pod(&target.namespace, first).await?;
    if !pod_is_ready(&pod) {
        debug!(workload = %target, pod = %first, "pod not ready");
        return Ok(false);
    }

    match pod
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| Utc::now().signed_duration_since(t.0))
    {
        Some(startup) => info!(
            workload = %target,
            pod = %first,
            startup_secs = startup.num_seconds(),
            "pod started"
        ),
        None => info!(workload = %target, pod = %first, "pod started"),
    }
    Ok(true)
}

/// StatefulSet readiness: nothing terminating and ready replicas equal desired replicas
async fn statefulset_ready(
    client: &dyn WorkloadClient,
    target: &WorkloadRef,
) -> Result<bool, Error> {
    let workload = client
        .get_workload(WorkloadKind::StatefulSet, &target.namespace, &target.name)
        .await?;

    let pods = match workload.pod_selector()? {
        Some(selector) => client.list_pods(&target.namespace, &selector).await?,
        None => Vec::new(),
    };

    if let Some(terminating) = pods.iter().find(|p| pod_is_terminating(p)) {
        info!(
            workload = %target,
            pod = terminating.metadata.name.as_deref().unwrap_or_default(),
            "pod is terminating"
        );
        return Ok(false);
    }

    let Workload::StatefulSet(statefulset) = &workload else {
        return Err(Error::internal_with_context(
            "statefulset_ready",
            format!("{target} was returned as a {}", workload.kind()),
        ));
    };

    let (desired, ready) = replica_counts(statefulset);
    info!(workload = %target, expected = desired, ready = ready, "monitoring replicas");
    if ready == desired {
        info!(workload = %target, "statefulset ready");
        return Ok(true);
    }
    Ok(false)
}

/// True if the pod reports a `Ready=True` condition
pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == CONDITION_READY && c.status == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// True if the pod has a deletion timestamp
pub fn pod_is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// Desired and ready replica counts; unset desired means 1, unset ready means 0
pub fn replica_counts(statefulset: &StatefulSet) -> (i32, i32) {
    let desired = statefulset
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = statefulset
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    (desired, ready)
}
