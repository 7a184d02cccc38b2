use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use lineblocs_common::WorkloadSettings;
use lineblocs_kube::{ClusterConnector, RetryPolicy};
use secrecy::{ExposeSecret, SecretString};

use crate::error::ApiError;

pub struct CoreState {
    pub connector: Arc<dyn ClusterConnector>,
    pub settings: WorkloadSettings,
    pub retry: RetryPolicy,
    api_token: Option<SecretString>,
}

impl CoreState {
    pub fn new(
        connector: Arc<dyn ClusterConnector>,
        settings: WorkloadSettings,
        retry: RetryPolicy,
        api_token: Option<SecretString>,
    ) -> Self {
        Self {
            connector,
            settings,
            retry,
            api_token,
        }
    }

    pub fn requires_token(&self) -> bool {
        self.api_token.is_some()
    }

    /// Checks the `Authorization: Bearer` header when an API token is configured.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = &self.api_token else {
            return Ok(());
        };
        let provided = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(ApiError::Unauthenticated)?;
        if !constant_time_eq(provided.as_bytes(), expected.expose_secret().as_bytes()) {
            return Err(ApiError::Unauthenticated);
        }
        Ok(())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
