//! Settlement Keeper
//!
//! Hosts a batch settlement engine, rolls batches and executes matured proposals on a fixed
//! tick, and serves read-only settlement views over HTTP.

mod error;
mod routes;
mod services;
mod types;

#[cfg(test)]
mod test_support;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    Router,
};
use batch_settlement::{
    interfaces::{Collaborators, SystemClock},
    memory::{InMemoryCustody, RoleTable, StaticRegistry},
    SettlementEngine,
};
use constant_time_eq::constant_time_eq;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use routes::{health_router, views_router, AppState};
use services::Keeper;
use types::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "batch_settlement=info,settlement_keeper=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());

    info!(port = config.port, "Starting settlement keeper");
    info!(
        cors_origins = ?config.cors_origins,
        api_keys_configured = !config.api_keys.is_empty(),
        params = ?config.params,
        batch_policy = ?config.batch_policy,
        tick_interval_secs = config.tick_interval_secs,
        "Configuration loaded"
    );

    let engine = Arc::new(
        SettlementEngine::new(
            local_collaborators(&config),
            config.params,
            config.batch_policy,
        )
        .context("invalid settlement parameters")?,
    );

    // Background keeper
    let keeper = Keeper::new(engine.clone());
    tokio::spawn(keeper.run(Duration::from_secs(config.tick_interval_secs)));

    // Build CORS layer
    let cors = build_cors_layer(&config);

    // Build the router
    let app = Router::new()
        .merge(health_router(AppState {
            engine: engine.clone(),
        }))
        .merge(views_router(AppState { engine }))
        .layer(middleware::from_fn_with_state(
            config.clone(),
            api_key_middleware,
        ))
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(16 * 1024))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(address = %addr, "Server listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Collaborators for a standalone deployment: no vaults are registered and no roles granted
/// until a host wires real ones in.
fn local_collaborators(config: &Config) -> Collaborators {
    Collaborators {
        registry: Arc::new(StaticRegistry::new(config.treasury)),
        capabilities: Arc::new(RoleTable::new()),
        custody: Arc::new(InMemoryCustody::new()),
        clock: Arc::new(SystemClock),
    }
}

/// Build CORS layer from config
fn build_cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-api-key"),
        ])
}

fn api_key_allowed(api_keys: &[String], presented: &str) -> bool {
    api_keys
        .iter()
        .any(|key| constant_time_eq(key.as_bytes(), presented.as_bytes()))
}

/// API key authentication middleware
async fn api_key_middleware(
    axum::extract::State(config): axum::extract::State<Arc<Config>>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    // Skip auth for health check
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    // If no API keys configured, allow all requests (development mode)
    if config.api_keys.is_empty() {
        return Ok(next.run(request).await);
    }

    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("Request missing API key");
            StatusCode::UNAUTHORIZED
        })?;

    if !api_key_allowed(&config.api_keys, api_key) {
        warn!("Invalid API key provided");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
