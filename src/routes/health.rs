use crate::server::SharedState;
use axum::{extract::State, response::Json};
use serde::Serialize;

/// Liveness plus whether frames can currently be served.
#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    model_loaded: bool,
}

pub async fn healthcheck(State(state): State<SharedState>) -> Json<Health> {
    Json(Health {
        status: "Available",
        model_loaded: state.registry.snapshot().is_some(),
    })
}
