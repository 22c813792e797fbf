//! Integration tests for CRD operations
//!
//! These tests tell the story of how users submit WorkloadMigration resources
//! through the Kubernetes API.

use kube::api::{Api, DeleteParams, PostParams};

use poolshift::crd::{
    ConstraintChange, CredentialMode, Procedure, WorkloadMigration, WorkloadMigrationSpec,
};
use poolshift::workload::WorkloadKind;

use super::helpers::{delete_namespace, ensure_test_cluster, fresh_namespace};

/// Story: a platform engineer submits a migration and reads it back with
/// defaults filled in
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_submitted_migration_round_trips_through_the_api() {
    let client = ensure_test_cluster().await.expect("test cluster");
    let ns = "poolshift-crd";
    fresh_namespace(&client, ns).await.expect("namespace");

    let api: Api<WorkloadMigration> = Api::namespaced(client.clone(), ns);
    let migration = WorkloadMigration::new(
        "drain-blue",
        WorkloadMigrationSpec {
            cluster_name: "aks-prod".to_string(),
            procedures: vec![Procedure {
                workload_type: WorkloadKind::Deployment,
                namespace: "shop".to_string(),
                workloads: vec!["web".to_string()],
                affinity: Some(ConstraintChange::new("agentpool", "blue", "green")),
                ..Default::default()
            }],
            ..Default::default()
        },
    );

    api.create(&PostParams::default(), &migration)
        .await
        .expect("create migration");
    let stored = api.get("drain-blue").await.expect("get migration");

    assert_eq!(stored.spec.credential_mode, CredentialMode::AdminCredentials);
    assert!(!stored.spec.retry_on_error);
    assert_eq!(stored.spec.procedures, migration.spec.procedures);
    assert!(stored.spec.validate().is_ok());

    api.delete("drain-blue", &DeleteParams::default())
        .await
        .expect("delete migration");
    delete_namespace(&client, ns).await;
}
