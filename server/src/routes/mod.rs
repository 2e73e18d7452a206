mod handlers;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::{triage_pipeline::PollOrchestrator, AppContext};

pub use handlers::handler_404;

#[derive(Clone)]
pub struct RouterState {
    pub ctx: AppContext,
    pub orchestrator: PollOrchestrator,
}

pub struct StatusRouter;

impl StatusRouter {
    pub fn create(state: RouterState) -> Router {
        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST]);

        Router::new()
            .route("/", get(|| async { "OK" }))
            .route("/status", get(handlers::get_status))
            .route("/poll", post(handlers::trigger_poll))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer)
            .with_state(state)
            .fallback(handler_404)
    }
}
