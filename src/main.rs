mod candidate;
mod config;
mod error;
mod gateway;
mod protocol;
mod registry;
mod room;
mod session;
mod signaling;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::gateway::{HttpMediaGateway, MediaGateway};
use crate::registry::SessionRegistry;
use crate::signaling::AppState;

// ─── CORS configuration ────────────────────────────────────────────────────

fn build_cors_layer(allowed_origins: &str) -> CorsLayer {
    if allowed_origins == "*" {
        warn!("CORS: permissive mode (allow all origins) — not suitable for production");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<HeaderValue>().expect("invalid origin header value"))
            .collect();

        info!("CORS: restricted to {} origin(s)", origins.len());

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([HeaderName::from_static("content-type")])
    }
}

// ─── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Load .env before anything else so ONECAST_LOG_LEVEL is available.
    let _ = dotenvy::dotenv();

    let log_level = std::env::var("ONECAST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    let cfg = config::Config::from_env();
    let bind_addr = cfg.bind_addr.clone();
    let allowed_origins = cfg.allowed_origins.clone();

    let http_gateway = Arc::new(HttpMediaGateway::new(
        cfg.gateway_url.clone(),
        cfg.callback_url.clone(),
    ));
    let gateway: Arc<dyn MediaGateway> = http_gateway.clone();
    let registry = SessionRegistry::new(gateway, cfg.max_viewers_per_room);

    let state = Arc::new(AppState {
        config: cfg,
        registry,
        http_gateway,
    });

    let cors = build_cors_layer(&allowed_origins);

    let app = Router::new()
        .route("/one2many", get(signaling::ws_handler))
        .route("/hooks/candidates", post(signaling::candidate_hook_handler))
        .route("/health", get(signaling::health_handler))
        .layer(cors)
        .with_state(state);

    info!("onecast signaling server listening on http://{bind_addr}");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind listener");
    axum::serve(listener, app).await.expect("server error");
}
