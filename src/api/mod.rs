//! HTTP surface
//!
//! `/benchmark/*` routes sit behind bearer authentication; the health
//! routes are open.

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::bench::JobScheduler;

pub use error::ApiError;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<JobScheduler>,
    pub api_token: Option<Arc<str>>,
    /// Let requests through when no token is configured
    pub allow_anonymous: bool,
}

impl AppState {
    pub fn new(scheduler: Arc<JobScheduler>) -> Self {
        let config = scheduler.config();
        let api_token = config.api_token.as_deref().map(Arc::from);
        let allow_anonymous = config.allow_anonymous;
        Self {
            scheduler,
            api_token,
            allow_anonymous,
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let benchmark = Router::new()
        .route("/benchmark/start", post(handlers::start_benchmark))
        .route("/benchmark/status/:job_id", get(handlers::job_status))
        .route("/benchmark/cancel/:job_id", post(handlers::cancel_job))
        .route("/benchmark/jobs", get(handlers::list_jobs))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::bearer_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/health", get(handlers::health))
        .merge(benchmark)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
