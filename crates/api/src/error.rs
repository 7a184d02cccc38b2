use axum::{http::StatusCode, response::IntoResponse};
use lineblocs_kube::ClusterError;

/// Failures surfaced to HTTP callers. Every variant answers with an empty body.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated,
    Unauthorized,
    InternalError(String),
}

impl From<ClusterError> for ApiError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::NotOwner { .. } => {
                tracing::warn!("refused update: {err}");
                Self::Unauthorized
            }
            err => {
                let err: anyhow::Error = err.into();
                Self::InternalError(format!("{err:#}"))
            }
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ApiError::*;
        let err = match self {
            Unauthenticated => "Not authenticated",
            Unauthorized => "Not authorized",
            InternalError(_) => "Internal Server Error",
        };
        f.write_str(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use ApiError::*;
        if let InternalError(e) = &self {
            tracing::error!("internal server error: {e}");
        }
        let status = match self {
            Unauthenticated => StatusCode::UNAUTHORIZED,
            Unauthorized => StatusCode::FORBIDDEN,
            InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        status.into_response()
    }
}
