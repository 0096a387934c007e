//! On-demand insight generation and stored insights

use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use kwacha_core::db::RECENT_INSIGHTS_LIMIT;
use kwacha_core::insights::fallback_insights;
use kwacha_core::models::{Insight, Period, UserInsight};

use crate::{AppError, AppState, AuthUser};

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub insights: Vec<Insight>,
    pub period: Period,
    /// Transactions in the analysed window
    pub analyzed: i64,
    /// True when the AI service failed and rule-based insights were used
    pub fallback: bool,
}

/// POST /api/v1/insights/generate - Generate insights from the last 24 hours
///
/// Generated insights are stored like scheduled ones. If the AI service
/// fails, rule-based insights are returned (and stored) instead.
pub async fn generate_insights(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<GenerateResponse>, AppError> {
    let generator = state
        .generator
        .as_ref()
        .ok_or_else(|| AppError::service_unavailable("AI insights are not configured"))?;

    state.db.require_consent(user.user_id)?;

    let period = Period::Daily;
    let aggregate = state
        .db
        .spending_aggregate(user.user_id, period, Utc::now())?;

    if aggregate.is_empty() {
        return Ok(Json(GenerateResponse {
            message: Some("No transactions to analyze".to_string()),
            insights: Vec::new(),
            period,
            analyzed: 0,
            fallback: false,
        }));
    }

    let (insights, fallback) = match generator.generate(&aggregate).await {
        Ok(insights) => (insights, false),
        Err(e) => {
            warn!(user_id = user.user_id, error = %e, "AI analysis failed, using fallback");
            (fallback_insights(&aggregate), true)
        }
    };

    state.db.save_insights(user.user_id, &insights)?;
    info!(
        user_id = user.user_id,
        count = insights.len(),
        fallback,
        "Insights generated on demand"
    );

    Ok(Json(GenerateResponse {
        message: None,
        insights,
        period,
        analyzed: aggregate.transaction_count,
        fallback,
    }))
}

#[derive(Debug, Serialize)]
pub struct InsightListResponse {
    pub insights: Vec<UserInsight>,
    pub skipped_rows: usize,
}

/// GET /api/v1/insights - The caller's most recent stored insights
pub async fn list_insights(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<InsightListResponse>, AppError> {
    let scanned = state
        .db
        .recent_insights(user.user_id, RECENT_INSIGHTS_LIMIT)?;
    Ok(Json(InsightListResponse {
        insights: scanned.rows,
        skipped_rows: scanned.skipped_rows,
    }))
}
