//! Authenticated clients for target clusters
//!
//! [`KubeconfigAccess`] builds a [`KubeWorkloadClient`] from the kubeconfig
//! according to the migration's [`CredentialMode`]. [`CachedClusterAccess`]
//! wraps any provider so concurrent reconciliations share one client per
//! cluster and only one of them pays for initialization.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::process::Command;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::client::{KubeWorkloadClient, WorkloadClient};
use crate::crd::CredentialMode;
use crate::Error;

/// Environment variables `CliLogin` needs for a service-principal login
pub const LOGIN_ENV_VARS: [&str; 3] =
    ["AZURE_CLIENT_ID", "AZURE_CLIENT_SECRET", "AZURE_TENANT_ID"];

/// Identifies a target cluster and how to authenticate against it
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ClusterRef {
    /// Cloud subscription
    pub subscription_id: String,
    /// Resource group
    pub resource_group: String,
    /// Cluster name; empty means the cluster the operator runs in
    pub cluster_name: String,
    /// Authentication mode
    pub credential_mode: CredentialMode,
}

impl ClusterRef {
    /// True when no cluster is named and the ambient config should be used
    pub fn is_local(&self) -> bool {
        self.cluster_name.trim().is_empty()
    }

    /// Kubeconfig context selected for this cluster, `None` for the ambient config
    pub fn context_name(&self) -> Option<String> {
        if self.is_local() {
            return None;
        }
        match self.credential_mode {
            CredentialMode::AdminCredentials => Some(format!("{}-admin", self.cluster_name)),
            CredentialMode::UserCredentials | CredentialMode::CliLogin => {
                Some(self.cluster_name.clone())
            }
        }
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            write!(f, "in-cluster")
        } else {
            write!(f, "{}", self.cluster_name)
        }
    }
}

/// Hands out a [`WorkloadClient`] for a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Authenticated client for `cluster`; failures are [`Error::Credential`]
    async fn client_for(&self, cluster: &ClusterRef) -> Result<Arc<dyn WorkloadClient>, Error>;

    /// Forget any client held for `cluster` so the next call re-authenticates
    async fn evict(&self, _cluster: &ClusterRef) {}
}

// =============================================================================
// Kubeconfig-backed access
// =============================================================================

/// Builds clients from the local kubeconfig
#[derive(Clone, Debug, Default)]
pub struct KubeconfigAccess {
    kubeconfig: Option<PathBuf>,
}

impl KubeconfigAccess {
    /// Use `KUBECONFIG` or `~/.kube/config`
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit kubeconfig file
    pub fn with_kubeconfig(path: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig: Some(path.into()),
        }
    }

    fn read_kubeconfig(&self, cluster: &ClusterRef) -> Result<Kubeconfig, Error> {
        let read = match &self.kubeconfig {
            Some(path) => Kubeconfig::read_from(path),
            None => Kubeconfig::read(),
        };
        read.map_err(|e| {
            Error::credential(cluster.to_string(), format!("failed to read kubeconfig: {e}"))
        })
    }

    /// Convert the kubeconfig to service-principal login through kubelogin
    async fn convert_for_login(&self, cluster: &ClusterRef) -> Result<(), Error> {
        let missing = missing_login_env(|name| std::env::var(name).ok());
        if !missing.is_empty() {
            return Err(Error::credential(
                cluster.to_string(),
                format!("CliLogin requires {}", missing.join(", ")),
            ));
        }

        let mut cmd = Command::new("kubelogin");
        cmd.args(["convert-kubeconfig", "-l", "spn"]);
        if let Some(path) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(path);
        }

        debug!(cluster = %cluster, "running kubelogin convert-kubeconfig");
        let output = cmd.output().await.map_err(|e| {
            Error::credential(cluster.to_string(), format!("failed to run kubelogin: {e}"))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::credential(
                cluster.to_string(),
                format!("kubelogin failed: {}", stderr.trim()),
            ));
        }
        Ok(())
    }

    async fn config_for(&self, cluster: &ClusterRef) -> Result<Config, Error> {
        let Some(context) = cluster.context_name() else {
            return Config::infer()
                .await
                .map_err(|e| Error::credential(cluster.to_string(), e.to_string()));
        };

        if cluster.credential_mode == CredentialMode::CliLogin {
            self.convert_for_login(cluster).await?;
        }

        let kubeconfig = self.read_kubeconfig(cluster)?;
        let options = KubeConfigOptions {
            context: Some(context.clone()),
            ..Default::default()
        };
        Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| {
                Error::credential(
                    cluster.to_string(),
                    format!("kubeconfig context {context}: {e}"),
                )
            })
    }
}

#[async_trait]
impl ClusterAccess for KubeconfigAccess {
    #[instrument(skip(self), fields(cluster = %cluster, mode = %cluster.credential_mode))]
    async fn client_for(&self, cluster: &ClusterRef) -> Result<Arc<dyn WorkloadClient>, Error> {
        let config = self.config_for(cluster).await?;
        let client = Client::try_from(config)
            .map_err(|e| Error::credential(cluster.to_string(), e.to_string()))?;
        info!("cluster client ready");
        Ok(Arc::new(KubeWorkloadClient::new(client)))
    }
}

/// Names from [`LOGIN_ENV_VARS`] that `lookup` reports unset or empty
pub fn missing_login_env<F>(lookup: F) -> Vec<&'static str>
where
    F: Fn(&str) -> Option<String>,
{
    LOGIN_ENV_VARS
        .into_iter()
        .filter(|name| lookup(name).map(|v| v.is_empty()).unwrap_or(true))
        .collect()
}

// =============================================================================
// Cached access
// =============================================================================

type ClientCell = Arc<OnceCell<Arc<dyn WorkloadClient>>>;

/// Caches one client per [`ClusterRef`] with single-flight initialization
///
/// Failed initializations are not cached, so the next caller tries again.
pub struct CachedClusterAccess<A> {
    inner: A,
    cells: Mutex<HashMap<ClusterRef, ClientCell>>,
}

impl<A: ClusterAccess> CachedClusterAccess<A> {
    /// Wrap a provider
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            cells: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<A: ClusterAccess> ClusterAccess for CachedClusterAccess<A> {
    async fn client_for(&self, cluster: &ClusterRef) -> Result<Arc<dyn WorkloadClient>, Error> {
        // The map lock is only held long enough to fetch the cell; waiting on
        // initialization happens on the cell itself.
        let cell = {
            let mut cells = self.cells.lock().await;
            cells.entry(cluster.clone()).or_default().clone()
        };
        let client = cell
            .get_or_try_init(|| self.inner.client_for(cluster))
            .await?;
        Ok(client.clone())
    }

    async fn evict(&self, cluster: &ClusterRef) {
        if self.cells.lock().await.remove(cluster).is_some() {
            debug!(cluster = %cluster, "evicted cached client");
        }
    }
}
