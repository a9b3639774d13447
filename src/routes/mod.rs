mod detect;
mod health;
mod metrics;
mod models;
mod system;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(system::home))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/system/stats", get(system::system_stats))
        .route("/models/list", get(models::list_models))
        .route("/models/current", get(models::current_model))
        .route("/models/select", post(models::select_model))
        .route("/ws/detect", get(detect::detect_stream))
}
