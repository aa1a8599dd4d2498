mod auth;
mod chat;
mod config;
mod cors;
mod db;
mod error;
mod metrics;
mod presence;
mod rooms;
mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header::HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::SessionStore;
use crate::config::ServerConfig;
use crate::db::migrations::run_migrations;
use crate::db::pool::{check_pool_health, create_pg_pool, PoolConfig};
use crate::presence::PresenceRegistry;
use crate::rooms::RoomStore;
use crate::ws::{HeartbeatConfig, RealtimeState};

const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
const REQUEST_ID_HEADER: &str = "x-request-id";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    metrics::set_global_metrics(Arc::new(metrics::RealtimeMetrics::default()));

    let database_url = config
        .database_url
        .clone()
        .context("WAYPOINT_SERVER_DATABASE_URL must be set")?;
    let pool = create_pg_pool(&database_url, PoolConfig::from_env())
        .await
        .context("failed to initialize PostgreSQL pool")?;
    check_pool_health(&pool).await.context("PostgreSQL health check failed")?;
    run_migrations(&pool).await?;

    let registry = PresenceRegistry::new(config.presence_debounce);
    if registry.spawn_debounce_flusher().is_some() {
        info!(
            debounce_ms = config.presence_debounce.as_millis() as u64,
            "presence broadcasts are debounced"
        );
    }

    let state = RealtimeState {
        sessions: SessionStore::Postgres(pool.clone()),
        rooms: RoomStore::Postgres(pool),
        registry,
        heartbeat: HeartbeatConfig {
            interval: config.heartbeat_interval,
            timeout: config.heartbeat_timeout,
        },
    };

    let app = build_router(state);
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting realtime server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("realtime server exited unexpectedly")
}

fn build_router(state: RealtimeState) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(metrics_endpoint))
            .merge(ws::router(state)),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(cors::cors_layer())
        .layer(middleware::from_fn(track_request))
        .layer(middleware::from_fn(catch_panics))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn metrics_endpoint() -> Response {
    match metrics::global_metrics() {
        Some(metrics) => (StatusCode::OK, metrics.render_prometheus()).into_response(),
        None => (StatusCode::OK, String::new()).into_response(),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler installs");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received, draining");
}

// Handlers run on their own task so a panic unwinds there and becomes
// a 500, instead of tearing down the hyper connection task.
async fn catch_panics(request: Request<Body>, next: Next) -> Response {
    let handled = tokio::spawn(async move { next.run(request).await }).await;
    handled.unwrap_or_else(|panic| {
        error!(?panic, "request handler panicked");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

async fn track_request(request: Request<Body>, next: Next) -> Response {
    let request_id = match request.headers().get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()) {
        Some(id) if !id.is_empty() => id.to_owned(),
        _ => Uuid::new_v4().to_string(),
    };
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    info!(
        %request_id,
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "http request"
    );

    response
}
