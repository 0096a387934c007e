//! Operator API: usage stats, cross-user listings, manual sweeps and pushes

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use kwacha_core::db::NotificationRecord;
use kwacha_core::models::{
    AdminInsight, AdminStats, AdminTransaction, AdminUser, BroadcastTarget, InsightFilter,
    NotificationKind, Page, Pagination, TransactionFilter, UserFilter,
};
use kwacha_core::{PushBackend, PushData};

use super::parse_json;
use crate::{AppError, AppState};

/// GET /admin/api/stats
pub async fn admin_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AdminStats>, AppError> {
    Ok(Json(state.db.admin_stats(Utc::now())?))
}

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub filter: Option<String>,
}

/// GET /admin/api/users?filter=all|synced
pub async fn admin_users(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UsersQuery>,
) -> Result<Json<Page<AdminUser>>, AppError> {
    let filter: UserFilter = params
        .filter
        .as_deref()
        .unwrap_or("")
        .parse()
        .map_err(|e: String| AppError::bad_request(&e))?;
    let page = Pagination::from_page(params.page, params.limit);
    Ok(Json(state.db.admin_users(filter, page)?))
}

fn parse_date(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| AppError::bad_request(&format!("{} must be YYYY-MM-DD", field))),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
pub struct InsightsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub user_id: Option<i64>,
    pub date_from: Option<String>,
}

/// GET /admin/api/insights
pub async fn admin_insights(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InsightsQuery>,
) -> Result<Json<Page<AdminInsight>>, AppError> {
    let filter = InsightFilter {
        user_id: params.user_id,
        date_from: parse_date("date_from", params.date_from.as_deref())?,
    };
    let page = Pagination::from_page(params.page, params.limit);
    Ok(Json(state.db.admin_insights(&filter, page)?))
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub user_id: Option<i64>,
    pub category: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

/// GET /admin/api/transactions
pub async fn admin_transactions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransactionsQuery>,
) -> Result<Json<Page<AdminTransaction>>, AppError> {
    let filter = TransactionFilter {
        user_id: params.user_id,
        category: params.category,
        date_from: parse_date("date_from", params.date_from.as_deref())?,
        date_to: parse_date("date_to", params.date_to.as_deref())?,
    };
    let page = Pagination::from_page(params.page, params.limit);
    Ok(Json(state.db.admin_transactions(&filter, page)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    pub user_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub message: String,
    pub user_id: Option<i64>,
}

/// POST /admin/api/trigger-insights - Start the daily sweep now
///
/// The sweep always covers every consenting user; a `user_id` in the body is
/// echoed back but does not narrow the run. Answers 409 while a sweep is
/// already running.
pub async fn trigger_insights(
    State(state): State<Arc<AppState>>,
    body: Option<Json<TriggerRequest>>,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();

    if state.sweep_in_progress() {
        return Err(AppError::new(
            StatusCode::CONFLICT,
            "An insight sweep is already running",
        ));
    }

    if let Some(scheduler) = &state.scheduler {
        scheduler.trigger();
    } else {
        let job = state
            .sweep_job()
            .ok_or_else(|| AppError::service_unavailable("AI insights are not configured"))?;
        if !state.spawn_manual_sweep(job) {
            return Err(AppError::new(
                StatusCode::CONFLICT,
                "An insight sweep is already running",
            ));
        }
    }

    let message = match request.user_id {
        Some(_) => "Analysis triggered (sweep covers all users)",
        None => "Analysis triggered for all users",
    };
    info!(user_id = ?request.user_id, "Insight sweep triggered by operator");

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            message: message.to_string(),
            user_id: request.user_id,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub title: String,
    pub body: String,
    #[serde(default = "default_target")]
    pub target: String,
    pub user_ids: Option<Vec<i64>>,
    pub data: Option<PushData>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

fn default_target() -> String {
    "all".to_string()
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub message: String,
    pub count: usize,
}

/// POST /admin/api/broadcast - Push one message to a group of users
///
/// Delivery runs in the background; the response reports how many devices
/// were targeted. The outcome is written to the notification log.
pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BroadcastResponse>), AppError> {
    let request = parse_json(body)?;
    let push = state
        .push
        .clone()
        .ok_or_else(|| AppError::service_unavailable("Push notifications are not configured"))?;

    if request.title.trim().is_empty() || request.body.trim().is_empty() {
        return Err(AppError::bad_request("title and body are required"));
    }
    if request.scheduled_for.is_some_and(|at| at > Utc::now()) {
        return Err(AppError::bad_request("Scheduled broadcasts are not supported"));
    }

    let target = BroadcastTarget::parse(&request.target, request.user_ids)
        .map_err(|e| AppError::bad_request(&e))?;
    let tokens: Vec<String> = state
        .db
        .push_tokens(&target)?
        .into_iter()
        .map(|(_, token)| token)
        .collect();

    if tokens.is_empty() {
        return Err(AppError::bad_request("No tokens found"));
    }

    let count = tokens.len();
    let db = state.db.clone();
    let (title, body, data) = (request.title, request.body, request.data);
    tokio::spawn(async move {
        let (delivered, failed) = push
            .send_multicast(&tokens, &title, &body, data.as_ref())
            .await;
        info!(delivered, failed, "Broadcast finished");
        let record = NotificationRecord {
            user_id: None,
            kind: NotificationKind::Broadcast,
            recipients: tokens.len(),
            delivered,
            error: None,
        };
        if let Err(e) = db.record_notification(&record) {
            warn!(error = %e, "Failed to record broadcast");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(BroadcastResponse {
            message: "Broadcasting notification".to_string(),
            count,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: Option<PushData>,
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub success: bool,
}

/// POST /admin/api/notify - Push one message to one device token
pub async fn notify(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<Json<NotifyResponse>, AppError> {
    let request = parse_json(body)?;
    let push = state
        .push
        .as_ref()
        .ok_or_else(|| AppError::service_unavailable("Push notifications are not configured"))?;

    if request.token.trim().is_empty() {
        return Err(AppError::bad_request("token is required"));
    }

    let result = push
        .send(&request.token, &request.title, &request.body, request.data.as_ref())
        .await;

    let failure = result.as_ref().err().map(|e| e.to_string());
    let record = NotificationRecord {
        user_id: None,
        kind: NotificationKind::Direct,
        recipients: 1,
        delivered: usize::from(result.is_ok()),
        error: failure.as_deref(),
    };
    if let Err(e) = state.db.record_notification(&record) {
        warn!(error = %e, "Failed to record notification");
    }

    match result {
        Ok(()) => Ok(Json(NotifyResponse { success: true })),
        Err(e) => {
            error!(error = %e, "Direct notification failed");
            Err(AppError::new(
                StatusCode::BAD_GATEWAY,
                "Failed to send notification",
            ))
        }
    }
}
