//! Spending analytics for the calling device

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use kwacha_core::models::{AnalyticsSummary, Period, TrendPoint};

use crate::{AppError, AppState, AuthUser};

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
}

fn parse_period(query: &PeriodQuery, default: Period) -> Result<Period, AppError> {
    Period::parse_or(query.period.as_deref(), default).map_err(|e| AppError::bad_request(&e))
}

/// GET /api/v1/analytics/summary - Totals and breakdowns (default: monthly)
pub async fn analytics_summary(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<PeriodQuery>,
) -> Result<Json<AnalyticsSummary>, AppError> {
    let period = parse_period(&params, Period::Monthly)?;
    let summary = state
        .db
        .analytics_summary(user.user_id, period, Utc::now())?;
    Ok(Json(summary))
}

#[derive(Debug, Serialize)]
pub struct TrendsResponse {
    pub period: Period,
    pub trends: Vec<TrendPoint>,
}

/// GET /api/v1/analytics/trends - Income/expense per day, or per month for yearly
pub async fn analytics_trends(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<PeriodQuery>,
) -> Result<Json<TrendsResponse>, AppError> {
    let period = parse_period(&params, Period::Weekly)?;
    let trends = state.db.spending_trends(user.user_id, period, Utc::now())?;
    Ok(Json(TrendsResponse { period, trends }))
}
