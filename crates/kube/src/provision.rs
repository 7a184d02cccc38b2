use lineblocs_common::{WorkloadIdentity, WorkloadSettings};

use crate::{
    cluster::ClusterApi,
    error::Result,
    resources::{build_workload_resources, WorkloadResources},
};

/// Create the Service and then the Deployment of a new workload.
///
/// Nothing is checked beforehand: an existing workload makes the Service
/// create fail and the Deployment is never attempted. A failed Deployment
/// create leaves the Service behind.
pub async fn provision_workload(
    cluster: &dyn ClusterApi,
    identity: &WorkloadIdentity,
    settings: &WorkloadSettings,
) -> Result<WorkloadResources> {
    let resources = build_workload_resources(identity, settings)?;
    let namespace = settings.namespace.as_str();

    tracing::info!(name = %identity.name, namespace = %namespace, "Creating service");
    let service = cluster
        .create_service(namespace, &resources.service)
        .await?;

    tracing::info!(name = %identity.name, namespace = %namespace, "Creating deployment");
    let deployment = cluster
        .create_deployment(namespace, &resources.deployment)
        .await
        .map_err(|e| {
            tracing::warn!(
                name = %identity.name,
                namespace = %namespace,
                "Deployment create failed, service left in place"
            );
            e
        })?;

    Ok(WorkloadResources {
        service,
        deployment,
    })
}
