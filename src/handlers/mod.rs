//! Management API surface: route assembly and shared state.

pub mod analytics;
pub mod health;
pub mod keys_api;
pub mod logs_api;
pub mod stats_api;

use arc_swap::ArcSwap;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth;
use crate::config::Config;
use crate::manager::LogManager;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::stream::StreamServer;

/// State shared across all management API handlers
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<LogManager>,
    pub stream: Arc<StreamServer>,
    pub config: Arc<ArcSwap<Config>>,
}

/// Build the management API router.
///
/// Every route except `/health` requires a presented key; the
/// per-operation permission mapping is enforced in the handlers.
pub fn api_router(state: ApiState) -> Router {
    let limiter = RateLimiter::new(state.config.load().api.requests_per_minute);

    let protected = Router::new()
        .route("/subsystems", get(stats_api::list_subsystems))
        .route("/subsystems/:name/stats", get(stats_api::subsystem_stats))
        .route("/logs/search", post(logs_api::search))
        .route("/logs/download", post(logs_api::download))
        .route(
            "/logs/:subsystem",
            get(logs_api::list).delete(logs_api::clear),
        )
        .route("/logs", delete(logs_api::master_reset))
        .route("/analytics/overview", get(analytics::overview))
        .route("/analytics/:subsystem", get(analytics::subsystem))
        .route("/keys", get(keys_api::list).post(keys_api::create))
        .route("/keys/:prefix", delete(keys_api::revoke))
        .route("/stats", get(stats_api::stats))
        .route("/stats/performance", get(stats_api::performance))
        .layer(middleware::from_fn_with_state(
            state.manager.clone(),
            auth::auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .route("/health", get(health::health_check))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
