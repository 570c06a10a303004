//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    routing::{get, patch, post},
    Router,
};
use niche_discovery::{BroadcastEventBus, DiscoveryPipeline, ResultsAggregator};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::routes::{
    cancel_job_handler, create_job_handler, estimate_handler, events_handler, export_niches_handler,
    health_handler, job_status_handler, list_urls_handler, resume_job_handler, retry_url_handler,
    run_job_handler, update_url_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DiscoveryPipeline>,
    pub results: ResultsAggregator,
    pub events: BroadcastEventBus,
}

impl AppState {
    /// `events` must be the bus the pipeline was built with, or the SSE
    /// stream stays silent.
    pub fn new(pipeline: Arc<DiscoveryPipeline>, events: BroadcastEventBus) -> Self {
        let results = ResultsAggregator::new(pipeline.store().clone(), pipeline.planner().clone());
        Self {
            pipeline,
            results,
            events,
        }
    }
}

/// Build the Axum application router
pub fn build_app(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = cors_layer(allowed_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/estimate", post(estimate_handler))
        .route("/api/jobs", post(create_job_handler))
        .route("/api/jobs/:id", get(job_status_handler))
        .route("/api/jobs/:id/run", post(run_job_handler))
        .route("/api/jobs/:id/cancel", post(cancel_job_handler))
        .route("/api/jobs/:id/resume", post(resume_job_handler))
        .route("/api/jobs/:id/urls", get(list_urls_handler))
        .route("/api/jobs/:id/urls/:url_id", patch(update_url_handler))
        .route("/api/jobs/:id/urls/:url_id/retry", post(retry_url_handler))
        .route("/api/jobs/:id/niches/export", get(export_niches_handler))
        .route("/api/jobs/:id/events", get(events_handler))
        // Layers run bottom-up
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([CONTENT_TYPE]);

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}
