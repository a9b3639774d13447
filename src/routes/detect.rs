use crate::{server::SharedState, session::Session};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};
use std::sync::atomic::Ordering;

pub async fn detect_stream(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    let id = state.session_ids.fetch_add(1, Ordering::Relaxed) + 1;

    ws.on_upgrade(move |socket| async move {
        let session = Session::new(
            id,
            socket,
            state.registry.clone(),
            state.metrics.clone(),
            state.tracker_config.clone(),
        );
        session.run().await;
    })
}
