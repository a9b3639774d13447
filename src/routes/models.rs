use crate::{
    registry::{ModelMetadata, RegistryError},
    server::SharedState,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ControlError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ControlError::Registry(RegistryError::NotFound(_))
            | ControlError::Registry(RegistryError::LoadError { .. }) => StatusCode::NOT_FOUND,
            ControlError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::error!("Request failed: {} ({})", self, status);

        let body = serde_json::json!({ "detail": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize, Deserialize)]
pub struct ModelList {
    pub models: Vec<String>,
}

#[derive(Deserialize, Debug)]
pub struct SelectParams {
    model_name: String,
}

#[derive(Serialize)]
pub struct SelectResponse {
    status: &'static str,
    model: ModelMetadata,
}

#[instrument(skip(state))]
pub async fn list_models(State(state): State<SharedState>) -> Result<Json<ModelList>, ControlError> {
    let models = state.registry.list().await?;
    Ok(Json(ModelList { models }))
}

pub async fn current_model(State(state): State<SharedState>) -> Json<ModelMetadata> {
    Json(
        state
            .registry
            .current()
            .unwrap_or_else(|_| ModelMetadata::unloaded()),
    )
}

#[instrument(skip(state))]
pub async fn select_model(
    State(state): State<SharedState>,
    Query(params): Query<SelectParams>,
) -> Result<Json<SelectResponse>, ControlError> {
    match state.registry.load(&params.model_name).await {
        Ok(model) => {
            state.metrics.record_model_swap("success");
            Ok(Json(SelectResponse {
                status: "success",
                model,
            }))
        }
        Err(e) => {
            state.metrics.record_model_swap("failure");
            Err(e.into())
        }
    }
}
