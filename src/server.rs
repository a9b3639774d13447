use crate::{
    config::{Config, TrackerConfig},
    registry::ModelRegistry,
    routes::api_routes,
    telemetry::Metrics,
};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::{atomic::AtomicU64, Arc};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct SharedState {
    pub registry: Arc<ModelRegistry>,
    pub metrics: Arc<Metrics>,
    pub tracker_config: TrackerConfig,
    pub session_ids: Arc<AtomicU64>,
}

impl SharedState {
    pub fn new(
        registry: Arc<ModelRegistry>,
        metrics: Arc<Metrics>,
        tracker_config: TrackerConfig,
    ) -> Self {
        Self {
            registry,
            metrics,
            tracker_config,
            session_ids: Arc::new(AtomicU64::new(0)),
        }
    }
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(
        registry: Arc<ModelRegistry>,
        metrics: Arc<Metrics>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let addr = config.server.get_address();
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let app_state = SharedState::new(registry, metrics, config.tracker.clone());

        let router = Router::new()
            .merge(api_routes())
            .with_state(app_state)
            .layer(metrics_layer)
            .layer(CorsLayer::permissive());

        let listener = TcpListener::bind(&addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(self, shutdown_rx: Receiver<()>) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}
