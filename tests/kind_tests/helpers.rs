//! Test helpers for integration tests
//!
//! Provides utilities for managing the kind cluster, the CRD, and the
//! namespaces and workloads the stories migrate.

use std::collections::BTreeMap;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet};
use k8s_openapi::api::core::v1::{Affinity, Container, Namespace, Node, PodSpec, PodTemplateSpec};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Config, CustomResourceExt};
use tokio::sync::OnceCell;
use tokio::time::sleep;

use poolshift::crd::WorkloadMigration;
use poolshift::scheduling::{node_affinity_for, node_selector_for};

/// Name of the kind cluster used for integration tests
pub const TEST_CLUSTER_NAME: &str = "poolshift-integration-test";

/// Node label key the stories migrate on
pub const POOL_KEY: &str = "poolshift.dev/pool";

/// Pool label the kind node carries; workloads start on another pool
pub const NODE_POOL: &str = "green";

/// Global lock to ensure cluster is created only once
static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Track if CRD and node labels have been set up (async-safe)
static CLUSTER_PREPARED: OnceCell<Result<(), String>> = OnceCell::const_new();

/// Check if a kind cluster with the given name exists
pub fn kind_cluster_exists(name: &str) -> bool {
    let output = Command::new("kind")
        .args(["get", "clusters"])
        .output()
        .expect("failed to run kind");

    let clusters = String::from_utf8_lossy(&output.stdout);
    clusters.lines().any(|line| line.trim() == name)
}

/// Create a kind cluster for testing
pub fn create_kind_cluster(name: &str) -> Result<(), String> {
    if kind_cluster_exists(name) {
        println!("Kind cluster '{name}' already exists, reusing it");
        return Ok(());
    }

    println!("Creating kind cluster '{name}'...");
    let output = Command::new("kind")
        .args(["create", "cluster", "--name", name, "--wait", "60s"])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "failed to create kind cluster: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    println!("Kind cluster '{name}' created successfully");
    Ok(())
}

/// Install the WorkloadMigration CRD with server-side apply
pub async fn install_crd(client: &Client) -> Result<(), kube::Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("poolshift-tests").force();

    println!("Installing WorkloadMigration CRD...");
    crds.patch(
        "workloadmigrations.poolshift.dev",
        &params,
        &Patch::Apply(&WorkloadMigration::crd()),
    )
    .await?;

    // Wait for CRD to be established
    sleep(Duration::from_secs(2)).await;
    Ok(())
}

/// Label every node with `POOL_KEY=NODE_POOL`
pub async fn label_nodes(client: &Client) -> Result<(), kube::Error> {
    let nodes: Api<Node> = Api::all(client.clone());
    let pool_label = BTreeMap::from([(POOL_KEY, NODE_POOL)]);
    let patch = serde_json::json!({ "metadata": { "labels": pool_label } });

    for node in nodes.list(&ListParams::default()).await? {
        let name = node.metadata.name.unwrap_or_default();
        nodes
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

/// Create a Kubernetes client connected to the test cluster
pub async fn create_test_client() -> Result<Client, String> {
    let context_name = format!("kind-{TEST_CLUSTER_NAME}");

    let config = Config::from_kubeconfig(&kube::config::KubeConfigOptions {
        context: Some(context_name),
        ..Default::default()
    })
    .await
    .map_err(|e| format!("failed to load kubeconfig: {e}"))?;

    Client::try_from(config).map_err(|e| format!("failed to create client: {e}"))
}

/// Ensure the test cluster is ready (thread-safe, cluster created once)
///
/// Returns a fresh Client for each call - clients should not be shared across test threads.
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let cluster_result = CLUSTER_INIT.get_or_init(|| create_kind_cluster(TEST_CLUSTER_NAME));
    cluster_result.clone()?;

    let client = create_test_client().await?;

    let prepared = CLUSTER_PREPARED
        .get_or_init(|| async {
            let client = create_test_client().await?;
            install_crd(&client)
                .await
                .map_err(|e| format!("failed to install CRD: {e}"))?;
            label_nodes(&client)
                .await
                .map_err(|e| format!("failed to label nodes: {e}"))
        })
        .await;
    prepared.clone()?;

    Ok(client)
}

/// Create a fresh namespace, deleting any leftover from a previous run
pub async fn fresh_namespace(client: &Client, name: &str) -> Result<(), kube::Error> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    if namespaces.get_opt(name).await?.is_some() {
        namespaces.delete(name, &DeleteParams::default()).await?;
        while namespaces.get_opt(name).await?.is_some() {
            sleep(Duration::from_secs(1)).await;
        }
    }

    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    namespaces.create(&PostParams::default(), &ns).await?;
    Ok(())
}

/// Delete a namespace without waiting
pub async fn delete_namespace(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let _ = namespaces.delete(name, &DeleteParams::default()).await;
}

fn labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), name.to_string())])
}

fn pause_pod(name: &str, pod_spec: PodSpec) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels(name)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "pause".to_string(),
                image: Some("registry.k8s.io/pause:3.9".to_string()),
                ..Default::default()
            }],
            ..pod_spec
        }),
    }
}

/// Pod spec pinned to `pool` through required node affinity
pub fn affinity_to(pool: &str) -> PodSpec {
    PodSpec {
        affinity: Some(Affinity {
            node_affinity: Some(node_affinity_for(POOL_KEY, pool)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod spec pinned to `pool` through the node selector
pub fn selector_to(pool: &str) -> PodSpec {
    PodSpec {
        node_selector: Some(node_selector_for(POOL_KEY, pool)),
        ..Default::default()
    }
}

/// Create a one-replica pause Deployment
pub async fn create_deployment(
    client: &Client,
    namespace: &str,
    name: &str,
    pod_spec: PodSpec,
) -> Result<(), kube::Error> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels(name)),
                ..Default::default()
            },
            template: pause_pod(name, pod_spec),
            ..Default::default()
        }),
        ..Default::default()
    };
    api.create(&PostParams::default(), &deployment).await?;
    Ok(())
}

/// Create a pause StatefulSet
pub async fn create_statefulset(
    client: &Client,
    namespace: &str,
    name: &str,
    replicas: i32,
    pod_spec: PodSpec,
) -> Result<(), kube::Error> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let template = pause_pod(name, pod_spec);
    let statefulset: StatefulSet = serde_json::from_value(serde_json::json!({
        "metadata": { "name": name },
        "spec": {
            "replicas": replicas,
            "serviceName": name,
            "selector": { "matchLabels": labels(name) },
            "template": template,
        }
    }))
    .expect("statefulset manifest is valid");
    api.create(&PostParams::default(), &statefulset).await?;
    Ok(())
}
