use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, State},
    http::StatusCode,
    Form,
};
use lineblocs_common::WorkloadIdentity;
use lineblocs_kube::{provision_workload, update_image};
use serde::Deserialize;

use crate::{error::ApiError, state::CoreState};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateContainerForm {
    pub workspace: String,
    pub image: Option<String>,
    pub user_id: Option<String>,
}

/// Absent fields are treated as empty strings. A body that fails to decode,
/// for example one repeating a field, is dropped as a whole and every field
/// reads as empty.
fn form_or_default<T: Default>(form: Result<Form<T>, FormRejection>) -> T {
    match form {
        Ok(Form(form)) => form,
        Err(e) => {
            tracing::warn!("unreadable form body, using empty fields: {e}");
            T::default()
        }
    }
}

pub async fn create_container(
    State(state): State<Arc<CoreState>>,
    form: Result<Form<WorkloadIdentity>, FormRejection>,
) -> Result<StatusCode, ApiError> {
    let identity = form_or_default(form);
    let cluster = state.connector.connect().await?;
    provision_workload(cluster.as_ref(), &identity, &state.settings).await?;
    tracing::info!(
        name = %identity.name,
        domain = %identity.domain(&state.settings.domain_suffix),
        "workload provisioned"
    );
    Ok(StatusCode::OK)
}

pub async fn update_container(
    State(state): State<Arc<CoreState>>,
    form: Result<Form<UpdateContainerForm>, FormRejection>,
) -> Result<StatusCode, ApiError> {
    let form = form_or_default(form);
    let image = state.settings.target_image(form.image.as_deref());
    let owner = form.user_id.as_deref().filter(|user_id| !user_id.is_empty());
    let cluster = state.connector.connect().await?;
    update_image(
        cluster.as_ref(),
        &state.retry,
        &state.settings.namespace,
        &form.workspace,
        image,
        owner,
    )
    .await?;
    Ok(StatusCode::OK)
}
