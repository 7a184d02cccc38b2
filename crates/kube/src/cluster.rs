use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{api::PostParams, ResourceExt};
#[cfg(test)]
use mockall::automock;

use crate::error::{ClusterError, Result};

/// The slice of the Kubernetes API a workload needs.
///
/// `replace_deployment` is a conditional write: the object carries the
/// `resourceVersion` it was read at and the API server answers with a
/// conflict when someone else wrote in between.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service>;

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment>;
}

/// Hands out a cluster handle per request.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ClusterApi>>;
}

#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let name = service.name_any();
        let api: kube::Api<Service> = kube::Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), service)
            .await
            .map_err(|e| ClusterError::from_api(e, "Service", &name))
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment> {
        let name = deployment.name_any();
        let api: kube::Api<Deployment> = kube::Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), deployment)
            .await
            .map_err(|e| ClusterError::from_api(e, "Deployment", &name))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let api: kube::Api<Deployment> = kube::Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| ClusterError::from_api(e, "Deployment", name))
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment> {
        let name = deployment.name_any();
        let api: kube::Api<Deployment> = kube::Api::namespaced(self.client.clone(), namespace);
        api.replace(&name, &PostParams::default(), deployment)
            .await
            .map_err(|e| ClusterError::from_api(e, "Deployment", &name))
    }
}
