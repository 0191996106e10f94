//! HTTP exposition of the registry.

use crate::registry::MetricsRegistry;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

struct AppState {
    registry: MetricsRegistry,
    telemetry_path: String,
}

pub fn router(registry: MetricsRegistry, telemetry_path: &str) -> Router {
    let telemetry_path = if telemetry_path.starts_with('/') {
        telemetry_path.to_string()
    } else {
        format!("/{}", telemetry_path)
    };
    let state = Arc::new(AppState {
        registry,
        telemetry_path: telemetry_path.clone(),
    });

    let mut router = Router::new().route(&telemetry_path, get(metrics));
    if telemetry_path != "/" {
        router = router.route("/", get(landing));
    }
    router.with_state(state)
}

/// Serve until SIGINT or SIGTERM.
pub async fn serve(addr: SocketAddr, telemetry_path: &str, registry: MetricsRegistry) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, telemetry_path, "serving metrics");
    axum::serve(listener, router(registry, telemetry_path))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let interrupt = tokio::signal::ctrl_c();
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
    info!("shutting down");
}

async fn landing(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>HA Cluster Exporter</title></head>\n<body>\n\
         <h1>HA Cluster Exporter</h1>\n<p>Version {}</p>\n\
         <p><a href=\"{}\">Metrics</a></p>\n</body>\n</html>\n",
        env!("CARGO_PKG_VERSION"),
        state.telemetry_path
    ))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let samples = state.registry.gather().await;
    match state.registry.encode(&samples) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "could not encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
