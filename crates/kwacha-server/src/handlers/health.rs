//! Liveness endpoint

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{AppState, SchedulerState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub time: DateTime<Utc>,
    pub ai_enabled: bool,
    pub push_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerState>,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        time: Utc::now(),
        ai_enabled: state.generator.is_some(),
        push_enabled: state.push.is_some(),
        scheduler: state.scheduler.as_ref().map(|s| s.state()),
    })
}
