use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub const DEFAULT_WORKLOAD_NAMESPACE: &str = "voip-users";
pub const DEFAULT_IMAGE_PULL_SECRET: &str = "lineblocs-regcred";
pub const DEFAULT_DOMAIN_SUFFIX: &str = "lineblocs.com";
pub const DEFAULT_WORKLOAD_PORT: i32 = 10000;
pub const DEFAULT_RESTART_POLICY: &str = "Always";
pub const WORKLOAD_PORT_NAME: &str = "http";

pub const WORKLOAD_APP_LABEL: &str = "app";
pub const WORKLOAD_USER_ID_ANNOTATION: &str = "lineblocs.com/user-id";
pub const WORKLOAD_WORKSPACE_ID_ANNOTATION: &str = "lineblocs.com/workspace-id";

pub const LINEBLOCS_TOKEN_ENV_VAR: &str = "LINEBLOCS_TOKEN";
pub const LINEBLOCS_SECRET_ENV_VAR: &str = "LINEBLOCS_SECRET";
pub const LINEBLOCS_WORKSPACE_ID_ENV_VAR: &str = "LINEBLOCS_WORKSPACE_ID";
pub const LINEBLOCS_USER_ID_ENV_VAR: &str = "LINEBLOCS_USER_ID";
pub const LINEBLOCS_DOMAIN_ENV_VAR: &str = "LINEBLOCS_DOMAIN";
pub const LINEBLOCS_API_TOKEN_ENV_VAR: &str = "LINEBLOCS_API_TOKEN";

/// Who a workload belongs to and what it is called.
///
/// `name` becomes the Service and Deployment name as well as the first label
/// of the workload's domain, so it has to be a valid DNS label. Deserializes
/// from the create form, where absent fields read as empty strings.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct WorkloadIdentity {
    pub user_id: String,
    #[serde(rename = "workspace")]
    pub name: String,
    pub workspace_id: String,
}

impl WorkloadIdentity {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        workspace_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            workspace_id: workspace_id.into(),
        }
    }

    pub fn domain(&self, suffix: &str) -> String {
        format!("{}.{suffix}", self.name)
    }
}

/// Fixed values every workload is built from.
#[derive(Debug)]
pub struct WorkloadSettings {
    /// Namespace holding the Service and Deployment of every workload.
    pub namespace: String,
    /// Image the workload container starts with.
    pub image: String,
    /// Image an update switches the container to when the caller names none.
    pub update_image: Option<String>,
    /// Name of the registry credential secret referenced by the pod.
    pub image_pull_secret: String,
    pub domain_suffix: String,
    pub container_port: i32,
    pub service_port: i32,
    pub restart_policy: String,
    pub token: SecretString,
    pub secret: SecretString,
}

impl WorkloadSettings {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            namespace: DEFAULT_WORKLOAD_NAMESPACE.to_string(),
            image: image.into(),
            update_image: None,
            image_pull_secret: DEFAULT_IMAGE_PULL_SECRET.to_string(),
            domain_suffix: DEFAULT_DOMAIN_SUFFIX.to_string(),
            container_port: DEFAULT_WORKLOAD_PORT,
            service_port: DEFAULT_WORKLOAD_PORT,
            restart_policy: DEFAULT_RESTART_POLICY.to_string(),
            token: SecretString::from(String::new()),
            secret: SecretString::from(String::new()),
        }
    }

    /// The image an update applies: the caller's choice, then the configured
    /// update image, then the create image.
    pub fn target_image<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .filter(|image| !image.trim().is_empty())
            .or(self.update_image.as_deref())
            .unwrap_or(&self.image)
    }
}
