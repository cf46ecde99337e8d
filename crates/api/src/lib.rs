//! Nightwatch API Server Library

pub mod config;
pub mod db;
pub mod error;
mod middleware;
mod routes;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use nightwatch_core::CronCache;

use crate::middleware::auth::{require_admin, require_auth};
use crate::middleware::client_meta::capture_client_meta;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub cron_cache: CronCache,
    pub config: Arc<config::Config>,
}

/// Create the application router
pub fn create_router(state: AppState, cors_origin: &str) -> Router {
    let cors = if cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cors_origin == "mirror" {
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(|_: &_, _: &_| true))
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(true)
    } else {
        match cors_origin.parse::<axum::http::HeaderValue>() {
            Ok(origin) => CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(e) => {
                // Startup configuration problem; refuse to run half-open
                panic!("Invalid CORS origin configuration: {}", e);
            }
        }
    };

    let public = Router::new()
        .merge(routes::health::routes())
        .merge(routes::schedules::routes())
        .merge(routes::contacts::routes())
        .merge(routes::auth::public_routes());

    let authenticated = Router::new()
        .merge(routes::bookings::routes())
        .merge(routes::reports::routes())
        .merge(routes::push::routes())
        .merge(routes::auth::authed_routes())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    // require_auth runs first (outer layer), then the role check
    let admin = routes::admin::routes()
        .layer(axum_middleware::from_fn(require_admin))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .nest("/api/admin", admin)
        .layer(cors)
        .layer(CatchPanicLayer::new())
        .layer(axum_middleware::from_fn(capture_client_meta))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let remote_addr = request
                        .extensions()
                        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
                        .map(|ci| ci.0.to_string())
                        .unwrap_or_else(|| "unknown".into());

                    let user_agent = request
                        .headers()
                        .get(axum::http::header::USER_AGENT)
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("unknown");

                    let forwarded_for = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|h| h.to_str().ok());

                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                        remote_addr = %remote_addr,
                        forwarded_for = ?forwarded_for,
                        user_agent = %user_agent,
                    )
                })
                .on_request(|_request: &axum::http::Request<_>, _span: &tracing::Span| {
                    tracing::info!("started processing request");
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %response.status(),
                            "finished processing request"
                        );
                    },
                ),
        )
        .with_state(state)
}

/// Run the API server
///
/// Binds, serves and drains in-flight requests once `shutdown` fires.
pub async fn run_api(
    state: AppState,
    config: &config::Config,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = create_router(state, &config.cors_allowed_origin);
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await
}
