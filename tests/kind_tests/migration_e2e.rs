//! End-to-end migration stories
//!
//! The kind node is labelled `poolshift.dev/pool=green`. Workloads are created
//! pinned to `blue`, so their pods stay Pending until the migration moves them.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use poolshift::client::{KubeWorkloadClient, WorkloadClient};
use poolshift::crd::{ConstraintChange, Procedure, WorkloadMigrationSpec};
use poolshift::pipeline::{MigrationPipeline, MigrationReport, StepState};
use poolshift::scheduling;
use poolshift::workload::{WorkloadKind, WorkloadRef};

use super::helpers::{
    affinity_to, create_deployment, create_statefulset, delete_namespace, ensure_test_cluster,
    fresh_namespace, selector_to, POOL_KEY,
};

fn blue_to_green() -> ConstraintChange {
    ConstraintChange::new(POOL_KEY, "blue", "green")
}

/// Story: pending pods on a pool with no nodes are rescued by migrating their
/// Deployment and StatefulSet to the pool that exists
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_pending_workloads_become_ready_after_migration() {
    let client = ensure_test_cluster().await.expect("test cluster");
    let ns = "poolshift-e2e";
    fresh_namespace(&client, ns).await.expect("namespace");

    create_deployment(&client, ns, "web", affinity_to("blue"))
        .await
        .expect("deployment");
    create_statefulset(&client, ns, "db", 2, selector_to("blue"))
        .await
        .expect("statefulset");

    let spec = WorkloadMigrationSpec {
        procedures: vec![
            Procedure {
                workload_type: WorkloadKind::Deployment,
                namespace: ns.to_string(),
                workloads: vec!["web".to_string()],
                affinity: Some(blue_to_green()),
                timeout_seconds: Some(180),
                ..Default::default()
            },
            Procedure {
                workload_type: WorkloadKind::StatefulSet,
                namespace: ns.to_string(),
                workloads: vec!["db".to_string()],
                selector: Some(blue_to_green()),
                timeout_seconds: Some(240),
                ..Default::default()
            },
        ],
        ..Default::default()
    };

    let workloads = Arc::new(KubeWorkloadClient::new(client.clone()));
    let pipeline = MigrationPipeline::new(workloads.clone(), CancellationToken::new())
        .with_poll_interval(Duration::from_secs(2));
    let mut report = MigrationReport::new();
    pipeline.run(&spec, &mut report).await.expect("migration");

    let web = WorkloadRef::new(WorkloadKind::Deployment, ns, "web");
    let db = WorkloadRef::new(WorkloadKind::StatefulSet, ns, "db");
    assert_eq!(report.state(0, &web), Some(StepState::Ready));
    assert_eq!(report.state(1, &db), Some(StepState::Ready));

    let stored = workloads
        .get_workload(WorkloadKind::Deployment, ns, "web")
        .await
        .expect("get web");
    assert!(scheduling::matches_affinity(
        stored.pod_spec().expect("pod spec"),
        POOL_KEY,
        "green"
    ));

    delete_namespace(&client, ns).await;
}

/// Story: a dry run against the real cluster leaves the workloads pending
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_dry_run_does_not_touch_real_workloads() {
    let client = ensure_test_cluster().await.expect("test cluster");
    let ns = "poolshift-dry-run";
    fresh_namespace(&client, ns).await.expect("namespace");

    create_deployment(&client, ns, "web", affinity_to("blue"))
        .await
        .expect("deployment");

    let spec = WorkloadMigrationSpec {
        test_mode: true,
        procedures: vec![Procedure {
            workload_type: WorkloadKind::Deployment,
            namespace: ns.to_string(),
            workloads: vec!["web".to_string()],
            affinity: Some(blue_to_green()),
            ..Default::default()
        }],
        ..Default::default()
    };

    let workloads = Arc::new(KubeWorkloadClient::new(client.clone()));
    let pipeline = MigrationPipeline::new(workloads.clone(), CancellationToken::new());
    let mut report = MigrationReport::new();
    pipeline.run(&spec, &mut report).await.expect("dry run");

    assert_eq!(report.count(StepState::Skipped), 1);
    let stored = workloads
        .get_workload(WorkloadKind::Deployment, ns, "web")
        .await
        .expect("get web");
    assert!(scheduling::matches_affinity(
        stored.pod_spec().expect("pod spec"),
        POOL_KEY,
        "blue"
    ));

    delete_namespace(&client, ns).await;
}

/// Story: a workload with no pool constraint stops the migration before
/// anything is written
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_unconstrained_workload_is_rejected() {
    let client = ensure_test_cluster().await.expect("test cluster");
    let ns = "poolshift-reject";
    fresh_namespace(&client, ns).await.expect("namespace");

    create_deployment(&client, ns, "free", Default::default())
        .await
        .expect("deployment");

    let spec = WorkloadMigrationSpec {
        procedures: vec![Procedure {
            workload_type: WorkloadKind::Deployment,
            namespace: ns.to_string(),
            workloads: vec!["free".to_string()],
            affinity: Some(blue_to_green()),
            ..Default::default()
        }],
        ..Default::default()
    };

    let pipeline = MigrationPipeline::new(
        Arc::new(KubeWorkloadClient::new(client.clone())),
        CancellationToken::new(),
    );
    let err = pipeline
        .run(&spec, &mut MigrationReport::new())
        .await
        .expect_err("should reject");
    assert!(err.to_string().contains("missing scheduling constraint"));

    delete_namespace(&client, ns).await;
}
