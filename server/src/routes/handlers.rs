use axum::{extract::State, Json};
use serde::Serialize;

use crate::{error::AppError, observability::StatusSnapshot};

use super::RouterState;

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub started: bool,
}

pub async fn get_status(State(state): State<RouterState>) -> Json<StatusSnapshot> {
    Json(state.ctx.snapshot(state.orchestrator.is_running()))
}

pub async fn trigger_poll(State(state): State<RouterState>) -> Json<PollResponse> {
    let started = state.orchestrator.trigger_in_background();
    if started {
        tracing::info!("On-demand poll cycle started");
    }
    Json(PollResponse { started })
}

pub async fn handler_404() -> AppError {
    AppError::NotFound("Route does not exist".to_string())
}
