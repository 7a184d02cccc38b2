use std::{collections::BTreeMap, sync::LazyLock};

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Container, ContainerPort, EnvVar, LocalObjectReference, PodSpec, PodTemplateSpec,
            Service, ServicePort, ServiceSpec,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, ObjectMeta},
        util::intstr::IntOrString,
    },
};
use lineblocs_common::workload::{
    WorkloadIdentity, WorkloadSettings, LINEBLOCS_DOMAIN_ENV_VAR, LINEBLOCS_SECRET_ENV_VAR,
    LINEBLOCS_TOKEN_ENV_VAR, LINEBLOCS_USER_ID_ENV_VAR, LINEBLOCS_WORKSPACE_ID_ENV_VAR,
    WORKLOAD_APP_LABEL, WORKLOAD_PORT_NAME, WORKLOAD_USER_ID_ANNOTATION,
    WORKLOAD_WORKSPACE_ID_ANNOTATION,
};
use regex::Regex;
use secrecy::ExposeSecret;

use crate::error::{ClusterError, Result};

const MAX_WORKLOAD_NAME_LEN: usize = 63;

// RFC 1035 label, the strictest rule a Service name has to follow.
static WORKLOAD_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));

/// The Service and Deployment that make up one workload.
#[derive(Debug, Clone)]
pub struct WorkloadResources {
    pub service: Service,
    pub deployment: Deployment,
}

impl WorkloadResources {
    /// Traffic only reaches the pods when the Service selects exactly the
    /// labels the Deployment stamps on them and selects itself.
    pub fn check_selector(&self) -> Result<()> {
        let name = self.deployment.metadata.name.as_deref().unwrap_or_default();
        let service_selector = self
            .service
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.as_ref())
            .filter(|selector| !selector.is_empty());
        let spec = self.deployment.spec.as_ref();
        let pod_labels = spec
            .and_then(|spec| spec.template.metadata.as_ref())
            .and_then(|metadata| metadata.labels.as_ref());
        let match_labels = spec.and_then(|spec| spec.selector.match_labels.as_ref());

        let Some(service_selector) = service_selector else {
            return Err(ClusterError::InvalidWorkload(format!(
                "service {name} has no selector"
            )));
        };
        if Some(service_selector) != pod_labels {
            return Err(ClusterError::InvalidWorkload(format!(
                "service {name} selector doesn't match the pod labels"
            )));
        }
        if match_labels != pod_labels {
            return Err(ClusterError::InvalidWorkload(format!(
                "deployment {name} selector doesn't match its pod labels"
            )));
        }
        Ok(())
    }
}

pub fn validate_workload_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ClusterError::InvalidWorkload(
            "workload name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_WORKLOAD_NAME_LEN {
        return Err(ClusterError::InvalidWorkload(format!(
            "workload name {name} is longer than {MAX_WORKLOAD_NAME_LEN} characters"
        )));
    }
    if !WORKLOAD_NAME_RE.is_match(name) {
        return Err(ClusterError::InvalidWorkload(format!(
            "workload name {name} must be lowercase letters, digits or '-', start with a letter and end with a letter or digit"
        )));
    }
    Ok(())
}

/// Builds the objects for a workload without touching the cluster.
pub fn build_workload_resources(
    identity: &WorkloadIdentity,
    settings: &WorkloadSettings,
) -> Result<WorkloadResources> {
    validate_workload_name(&identity.name)?;
    if settings.image.trim().is_empty() {
        return Err(ClusterError::InvalidWorkload(
            "workload image cannot be empty".to_string(),
        ));
    }

    let labels = workload_labels(&identity.name);
    let resources = WorkloadResources {
        service: build_service(identity, settings, &labels),
        deployment: build_deployment(identity, settings, &labels),
    };
    resources.check_selector()?;
    Ok(resources)
}

pub fn workload_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(WORKLOAD_APP_LABEL.to_string(), name.to_string())])
}

fn build_service(
    identity: &WorkloadIdentity,
    settings: &WorkloadSettings,
    labels: &BTreeMap<String, String>,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(identity.name.clone()),
            namespace: Some(settings.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some(WORKLOAD_PORT_NAME.to_string()),
                protocol: Some("TCP".to_string()),
                port: settings.service_port,
                target_port: Some(IntOrString::Int(settings.container_port)),
                ..Default::default()
            }]),
            selector: Some(labels.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_deployment(
    identity: &WorkloadIdentity,
    settings: &WorkloadSettings,
    labels: &BTreeMap<String, String>,
) -> Deployment {
    let annotations = BTreeMap::from([
        (
            WORKLOAD_USER_ID_ANNOTATION.to_string(),
            identity.user_id.clone(),
        ),
        (
            WORKLOAD_WORKSPACE_ID_ANNOTATION.to_string(),
            identity.workspace_id.clone(),
        ),
    ]);

    let env = [
        (LINEBLOCS_TOKEN_ENV_VAR, settings.token.expose_secret().to_string()),
        (LINEBLOCS_SECRET_ENV_VAR, settings.secret.expose_secret().to_string()),
        (LINEBLOCS_WORKSPACE_ID_ENV_VAR, identity.workspace_id.clone()),
        (LINEBLOCS_USER_ID_ENV_VAR, identity.user_id.clone()),
        (LINEBLOCS_DOMAIN_ENV_VAR, identity.domain(&settings.domain_suffix)),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    })
    .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(identity.name.clone()),
            namespace: Some(settings.namespace.clone()),
            labels: Some(labels.clone()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: identity.name.clone(),
                        image: Some(settings.image.clone()),
                        ports: Some(vec![ContainerPort {
                            name: Some(WORKLOAD_PORT_NAME.to_string()),
                            protocol: Some("TCP".to_string()),
                            container_port: settings.container_port,
                            ..Default::default()
                        }]),
                        env: Some(env),
                        ..Default::default()
                    }],
                    restart_policy: Some(settings.restart_policy.clone()),
                    image_pull_secrets: Some(vec![LocalObjectReference {
                        name: settings.image_pull_secret.clone(),
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
