use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("In-cluster config error: {0}")]
    InCluster(#[from] kube::config::InClusterError),

    #[error("Cluster config inference error: {0}")]
    Infer(#[from] kube::config::InferConfigError),

    #[error("Kubernetes client construction error: {0}")]
    Client(#[source] kube::Error),

    #[error("Invalid workload: {0}")]
    InvalidWorkload(String),

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} was modified concurrently: {message}")]
    Conflict {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("Kubernetes API rejected {kind} {name} ({code} {reason}): {message}")]
    Rejected {
        kind: &'static str,
        name: String,
        code: u16,
        reason: String,
        message: String,
    },

    #[error("Kubernetes API error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("Gave up after {attempts} conflicting attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ClusterError>,
    },

    #[error("Workload {name} is not owned by user {user_id}")]
    NotOwner { name: String, user_id: String },
}

pub type Result<T> = std::result::Result<T, ClusterError>;

impl ClusterError {
    /// Classifies an error returned by the API server for one object.
    pub fn from_api(err: kube::Error, kind: &'static str, name: &str) -> Self {
        let kube::Error::Api(resp) = err else {
            return Self::Kubernetes(err);
        };
        let name = name.to_string();
        match (resp.code, resp.reason.as_str()) {
            (409, "AlreadyExists") => Self::AlreadyExists { kind, name },
            (409, _) => Self::Conflict {
                kind,
                name,
                message: resp.message,
            },
            (404, _) => Self::NotFound { kind, name },
            (code, _) => Self::Rejected {
                kind,
                name,
                code,
                reason: resp.reason,
                message: resp.message,
            },
        }
    }

    /// Whether the write lost an optimistic-concurrency race and may be
    /// retried against a fresh read.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} from api server"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn already_exists_is_not_a_conflict() {
        let err = ClusterError::from_api(api_error(409, "AlreadyExists"), "Service", "acme");
        assert!(matches!(err, ClusterError::AlreadyExists { kind: "Service", .. }));
        assert!(!err.is_conflict());
    }

    #[test]
    fn stale_resource_version_is_a_conflict() {
        let err = ClusterError::from_api(api_error(409, "Conflict"), "Deployment", "acme");
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "Deployment acme was modified concurrently: Conflict from api server"
        );
    }

    #[test]
    fn other_codes_are_classified() {
        let err = ClusterError::from_api(api_error(404, "NotFound"), "Deployment", "ghost");
        assert!(matches!(err, ClusterError::NotFound { .. }));

        let err = ClusterError::from_api(api_error(422, "Invalid"), "Deployment", "acme");
        assert!(matches!(err, ClusterError::Rejected { code: 422, .. }));
        assert!(!err.is_conflict());
    }
}
