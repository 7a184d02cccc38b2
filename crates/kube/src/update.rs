use k8s_openapi::api::apps::v1::Deployment;
use lineblocs_common::workload::WORKLOAD_USER_ID_ANNOTATION;

use crate::{
    cluster::ClusterApi,
    error::{ClusterError, Result},
    resources::validate_workload_name,
    retry::{retry_on_conflict, RetryPolicy},
};

/// Fetch a Deployment, apply `mutate` and write it back.
///
/// Every attempt starts from a fresh read so the write carries the latest
/// `resourceVersion`. A failed read or a failed `mutate` ends the update at
/// once; only conflicting writes go around again. `name` must be a valid
/// workload name since it becomes part of the request path.
pub async fn update_deployment_with<F>(
    cluster: &dyn ClusterApi,
    policy: &RetryPolicy,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<Deployment>
where
    F: Fn(&mut Deployment) -> Result<()> + Sync,
{
    validate_workload_name(name)?;
    let mutate = &mutate;
    retry_on_conflict(policy, "update deployment", move || async move {
        let mut deployment = cluster.get_deployment(namespace, name).await?;
        mutate(&mut deployment)?;
        cluster.replace_deployment(namespace, &deployment).await
    })
    .await
}

/// Point the workload's container at `image`.
///
/// With `owner` set, the Deployment must have been provisioned for that user.
/// Without it no ownership check happens, so callers that omit the user id
/// are only held back by the API token.
pub async fn update_image(
    cluster: &dyn ClusterApi,
    policy: &RetryPolicy,
    namespace: &str,
    name: &str,
    image: &str,
    owner: Option<&str>,
) -> Result<Deployment> {
    tracing::info!(name = %name, image = %image, "Updating deployment image");
    update_deployment_with(cluster, policy, namespace, name, |deployment| {
        if let Some(user_id) = owner {
            check_owner(deployment, name, user_id)?;
        }
        let container = deployment
            .spec
            .as_mut()
            .and_then(|spec| spec.template.spec.as_mut())
            .and_then(|pod| pod.containers.first_mut())
            .ok_or_else(|| {
                ClusterError::InvalidWorkload(format!("deployment {name} has no container"))
            })?;
        container.image = Some(image.to_string());
        Ok(())
    })
    .await
}

fn check_owner(deployment: &Deployment, name: &str, user_id: &str) -> Result<()> {
    let recorded = deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(WORKLOAD_USER_ID_ANNOTATION));
    if recorded.map(String::as_str) != Some(user_id) {
        return Err(ClusterError::NotOwner {
            name: name.to_string(),
            user_id: user_id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cluster::MockClusterApi, resources::build_workload_resources};
    use lineblocs_common::{WorkloadIdentity, WorkloadSettings};
    use mockall::Sequence;
    use std::time::Duration;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryPolicy::with_max_attempts(attempts)
        }
    }

    fn stored_deployment(version: &str) -> Deployment {
        let identity = WorkloadIdentity::new("u1", "acme", "ws1");
        let settings = WorkloadSettings::new("lineblocs/user-app:1.0");
        let mut deployment = build_workload_resources(&identity, &settings)
            .unwrap()
            .deployment;
        deployment.metadata.resource_version = Some(version.to_string());
        deployment
    }

    fn image_of(deployment: &Deployment) -> Option<&str> {
        deployment.spec.as_ref()?.template.spec.as_ref()?.containers[0]
            .image
            .as_deref()
    }

    fn conflict() -> ClusterError {
        ClusterError::Conflict {
            kind: "Deployment",
            name: "acme".to_string(),
            message: "the object has been modified".to_string(),
        }
    }

    #[tokio::test]
    async fn writes_new_image_with_fetched_version() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_deployment()
            .withf(|namespace, name| namespace == "voip-users" && name == "acme")
            .times(1)
            .returning(|_, _| Ok(stored_deployment("7")));
        cluster
            .expect_replace_deployment()
            .withf(|_, deployment| {
                deployment.metadata.resource_version.as_deref() == Some("7")
                    && image_of(deployment) == Some("lineblocs/user-app:2.0")
            })
            .times(1)
            .returning(|_, deployment| Ok(deployment.clone()));

        let updated = update_image(
            &cluster,
            &policy(5),
            "voip-users",
            "acme",
            "lineblocs/user-app:2.0",
            None,
        )
        .await
        .unwrap();
        assert_eq!(image_of(&updated), Some("lineblocs/user-app:2.0"));
    }

    #[tokio::test]
    async fn conflict_refetches_before_retrying() {
        let mut cluster = MockClusterApi::new();
        let mut seq = Sequence::new();
        cluster
            .expect_get_deployment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(stored_deployment("1")));
        cluster
            .expect_replace_deployment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(conflict()));
        cluster
            .expect_get_deployment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(stored_deployment("2")));
        cluster
            .expect_replace_deployment()
            .withf(|_, deployment| deployment.metadata.resource_version.as_deref() == Some("2"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, deployment| Ok(deployment.clone()));

        let result = update_image(&cluster, &policy(5), "voip-users", "acme", "img:2", None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn sustained_conflicts_give_up_after_budget() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_deployment()
            .times(3)
            .returning(|_, _| Ok(stored_deployment("1")));
        cluster
            .expect_replace_deployment()
            .times(3)
            .returning(|_, _| Err(conflict()));

        let err = update_image(&cluster, &policy(3), "voip-users", "acme", "img:2", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClusterError::RetriesExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn other_write_rejections_are_not_retried() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_deployment()
            .times(1)
            .returning(|_, _| Ok(stored_deployment("1")));
        cluster.expect_replace_deployment().times(1).returning(|_, _| {
            Err(ClusterError::Rejected {
                kind: "Deployment",
                name: "acme".to_string(),
                code: 422,
                reason: "Invalid".to_string(),
                message: "spec.template.spec.containers[0].image: Required value".to_string(),
            })
        });

        let err = update_image(&cluster, &policy(5), "voip-users", "acme", "img:2", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Rejected { code: 422, .. }));
    }

    #[tokio::test]
    async fn failed_fetch_aborts_without_write() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_get_deployment().times(1).returning(|_, name| {
            Err(ClusterError::NotFound {
                kind: "Deployment",
                name: name.to_string(),
            })
        });
        cluster.expect_replace_deployment().times(0);

        let err = update_image(&cluster, &policy(5), "voip-users", "ghost", "img:2", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::NotFound { .. }));
    }

    #[tokio::test]
    async fn foreign_owner_is_refused_before_write() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_deployment()
            .times(1)
            .returning(|_, _| Ok(stored_deployment("1")));
        cluster.expect_replace_deployment().times(0);

        let err = update_image(
            &cluster,
            &policy(5),
            "voip-users",
            "acme",
            "img:2",
            Some("u2"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClusterError::NotOwner { .. }));
    }

    #[tokio::test]
    async fn matching_owner_is_allowed() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_deployment()
            .returning(|_, _| Ok(stored_deployment("1")));
        cluster
            .expect_replace_deployment()
            .times(1)
            .returning(|_, deployment| Ok(deployment.clone()));

        let result = update_image(
            &cluster,
            &policy(5),
            "voip-users",
            "acme",
            "img:2",
            Some("u1"),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn deployment_without_container_is_invalid() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_get_deployment().times(1).returning(|_, _| {
            let mut deployment = stored_deployment("1");
            if let Some(pod) = deployment
                .spec
                .as_mut()
                .and_then(|spec| spec.template.spec.as_mut())
            {
                pod.containers.clear();
            }
            Ok(deployment)
        });
        cluster.expect_replace_deployment().times(0);

        let err = update_image(&cluster, &policy(5), "voip-users", "acme", "img:2", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::InvalidWorkload(_)));
    }

    #[tokio::test]
    async fn invalid_names_never_reach_the_cluster() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_get_deployment().times(0);
        cluster.expect_replace_deployment().times(0);

        for name in [
            "",
            "acme/scale",
            "../../kube-system/deployments/coredns",
            "Acme_Corp",
        ] {
            let err = update_image(&cluster, &policy(5), "voip-users", name, "img:2", None)
                .await
                .unwrap_err();
            assert!(matches!(err, ClusterError::InvalidWorkload(_)), "{name}");
        }
    }

    #[tokio::test]
    async fn absent_owner_skips_the_ownership_check() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_get_deployment().times(1).returning(|_, _| {
            let mut deployment = stored_deployment("1");
            deployment
                .metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert(WORKLOAD_USER_ID_ANNOTATION.to_string(), "someone-else".to_string());
            Ok(deployment)
        });
        cluster
            .expect_replace_deployment()
            .times(1)
            .returning(|_, deployment| Ok(deployment.clone()));

        let result = update_image(&cluster, &policy(5), "voip-users", "acme", "img:2", None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn generic_helper_applies_any_mutation() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_deployment()
            .returning(|_, _| Ok(stored_deployment("1")));
        cluster
            .expect_replace_deployment()
            .withf(|_, deployment| deployment.spec.as_ref().and_then(|s| s.replicas) == Some(3))
            .times(1)
            .returning(|_, deployment| Ok(deployment.clone()));

        let result = update_deployment_with(&cluster, &policy(5), "voip-users", "acme", |d| {
            if let Some(spec) = d.spec.as_mut() {
                spec.replicas = Some(3);
            }
            Ok(())
        })
        .await;
        assert!(result.is_ok());
    }
}
