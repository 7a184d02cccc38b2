use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use serde::Deserialize;

use crate::{
    cluster::{ClusterApi, ClusterConnector, KubeCluster},
    error::{ClusterError, Result},
};

/// Where cluster credentials come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialSource {
    /// The kubeconfig file under the home directory, `~/.kube/config`.
    #[default]
    Home,
    /// The service account mounted into the pod.
    InCluster,
    /// Whatever kube picks: `KUBECONFIG`, then the home kubeconfig, then the
    /// in-cluster environment.
    Infer,
}

/// Builds a fresh client for every connection request.
#[derive(Debug, Clone, Default)]
pub struct ClientFactory {
    source: CredentialSource,
    kubeconfig: Option<PathBuf>,
}

impl ClientFactory {
    pub fn new(source: CredentialSource, kubeconfig: Option<PathBuf>) -> Self {
        Self { source, kubeconfig }
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub async fn new_kube_client(&self) -> Result<kube::Client> {
        let config = self.retrieve_cluster_config().await?;
        kube::Client::try_from(config).map_err(ClusterError::Client)
    }

    async fn retrieve_cluster_config(&self) -> Result<kube::Config> {
        match self.source {
            CredentialSource::Home => self.retrieve_cluster_config_from_home().await,
            CredentialSource::InCluster => Ok(kube::Config::incluster()?),
            CredentialSource::Infer => Ok(kube::Config::infer().await?),
        }
    }

    async fn retrieve_cluster_config_from_home(&self) -> Result<kube::Config> {
        let path = self.kubeconfig_path()?;
        tracing::debug!(path = %path.display(), "reading kubeconfig");
        let kubeconfig = Kubeconfig::read_from(&path)?;
        Ok(kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?)
    }

    fn kubeconfig_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.kubeconfig {
            return Ok(path.clone());
        }
        let home = std::env::var_os("HOME")
            .filter(|home| !home.is_empty())
            .ok_or_else(|| ClusterError::Config("cannot get HOME dir".to_string()))?;
        Ok(PathBuf::from(home).join(".kube").join("config"))
    }
}

#[async_trait]
impl ClusterConnector for ClientFactory {
    async fn connect(&self) -> Result<Arc<dyn ClusterApi>> {
        let client = self.new_kube_client().await.map_err(|e| {
            tracing::error!("Failed to create Kubernetes client: {}", e);
            e
        })?;
        Ok(Arc::new(KubeCluster::new(client)))
    }
}
