use crate::collector::coordinator::ScrapeCoordinator;
use crate::error::{ExporterError, Result};
use crate::metrics::exposition::render_prometheus;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

#[derive(Clone)]
struct AppState {
    coordinator: Arc<ScrapeCoordinator>,
    static_labels: Arc<HashMap<String, String>>,
}

pub struct HttpServer {
    addr: SocketAddr,
    state: AppState,
}

impl HttpServer {
    pub fn new(
        host: &str,
        port: u16,
        coordinator: Arc<ScrapeCoordinator>,
        static_labels: HashMap<String, String>,
    ) -> Result<Self> {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| ExporterError::Config(format!("invalid listen address {host}:{port}")))?;

        Ok(Self {
            addr,
            state: AppState {
                coordinator,
                static_labels: Arc::new(static_labels),
            },
        })
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let app = router(self.state);

        info!(addr = %self.addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| ExporterError::Http(e.to_string()))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| ExporterError::Http(e.to_string()))?;

        Ok(())
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/", get(root_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.coordinator.request_scrape().await {
        Ok(samples) => {
            let body = render_prometheus(&samples, &state.static_labels);
            (
                StatusCode::OK,
                [("content-type", "text/plain; charset=utf-8")],
                body,
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Collection cycle failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "collection failed").into_response()
        }
    }
}

async fn healthz_handler() -> Response {
    (StatusCode::OK, "ok").into_response()
}

async fn root_handler() -> Response {
    let html = r#"<!DOCTYPE html>
<html>
<head><title>Kafka Exporter</title></head>
<body>
<h1>Kafka Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
<p><a href="/healthz">Health</a></p>
</body>
</html>"#;

    (
        StatusCode::OK,
        [("content-type", "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}
