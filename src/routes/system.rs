use crate::server::SharedState;
use axum::{extract::State, response::Json};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Serialize)]
pub struct Home {
    status: &'static str,
    current_model: String,
}

#[derive(Serialize)]
pub struct SystemStats {
    status: &'static str,
    timestamp: f64,
    gpu_utilization_percent: u32,
}

pub async fn home(State(state): State<SharedState>) -> Json<Home> {
    let current_model = state
        .registry
        .current()
        .map(|model| model.name)
        .unwrap_or_else(|_| "None".to_string());

    Json(Home {
        status: "running",
        current_model,
    })
}

pub async fn system_stats() -> Json<SystemStats> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();

    // no GPU probe yet; reported as 0
    Json(SystemStats {
        status: "online",
        timestamp,
        gpu_utilization_percent: 0,
    })
}
