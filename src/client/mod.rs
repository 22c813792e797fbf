//! Workload API access
//!
//! [`WorkloadClient`] is the only way the pipeline talks to a cluster. The
//! trait keeps the engine testable with mocks or an in-memory fake while
//! production uses [`KubeWorkloadClient`].

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, PostParams};
use kube::core::Selector;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::workload::{Workload, WorkloadKind, WorkloadRef};
use crate::Error;

/// Read/update operations the migration engine needs against a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Fetch a workload snapshot
    ///
    /// Returns [`Error::NotFound`] if the workload does not exist.
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, Error>;

    /// Persist a modified workload, returning the stored object
    ///
    /// Any rejection is reported as [`Error::Update`].
    async fn update_workload(&self, workload: &Workload) -> Result<Workload, Error>;

    /// List pods in a namespace matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &Selector) -> Result<Vec<Pod>, Error>;

    /// Fetch a single pod
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Error>;
}

/// Field manager recorded on objects the operator writes
pub const FIELD_MANAGER: &str = "poolshift-controller";

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct KubeWorkloadClient {
    client: Client,
}

impl KubeWorkloadClient {
    /// Create a new KubeWorkloadClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

/// Map a kube error on a named resource, turning 404 into [`Error::NotFound`]
fn map_get_error(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Error {
    if Error::is_kube_not_found(&err) {
        Error::not_found(kind, namespace, name)
    } else {
        Error::from(err)
    }
}

#[async_trait]
impl WorkloadClient for KubeWorkloadClient {
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, Error> {
        match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.get(name)
                    .await
                    .map(Workload::Deployment)
                    .map_err(|e| map_get_error(e, kind.as_str(), namespace, name))
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                api.get(name)
                    .await
                    .map(Workload::StatefulSet)
                    .map_err(|e| map_get_error(e, kind.as_str(), namespace, name))
            }
        }
    }

    async fn update_workload(&self, workload: &Workload) -> Result<Workload, Error> {
        let target: WorkloadRef = workload.reference();
        debug!(workload = %target, "replacing workload");

        let stored = match workload {
            Workload::Deployment(d) => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &target.namespace);
                api.replace(&target.name, &Self::post_params(), d)
                    .await
                    .map(Workload::Deployment)
            }
            Workload::StatefulSet(s) => {
                let api: Api<StatefulSet> =
                    Api::namespaced(self.client.clone(), &target.namespace);
                api.replace(&target.name, &Self::post_params(), s)
                    .await
                    .map(Workload::StatefulSet)
            }
        };

        stored.map_err(|e| Error::update(&target, e.to_string()))
    }

    async fn list_pods(&self, namespace: &str, selector: &Selector) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels_from(selector))
            .await?;
        Ok(pods.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| map_get_error(e, "pod", namespace, name))
    }
}
