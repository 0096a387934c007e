//! Transaction sync and listing

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use kwacha_core::models::{Pagination, Transaction, TransactionCandidate};

use super::parse_json;
use crate::{AppError, AppState, AuthUser};

/// Request body for a batch sync
#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    /// Informational; the token identifies the device
    #[serde(default)]
    pub device_id: Option<String>,
    pub transactions: Vec<TransactionCandidate>,
    /// Client send time, epoch milliseconds
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub message: String,
    pub inserted: usize,
    pub skipped: usize,
    pub total: usize,
}

/// POST /api/v1/sync - Store a batch of SMS-parsed transactions
///
/// Duplicates (same sms_hash for this user) are skipped, never updated.
pub async fn sync_transactions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<SyncResponse>, AppError> {
    let req = parse_json(payload)?;
    let result = state.db.sync_transactions(user.user_id, &req.transactions)?;

    info!(
        user_id = user.user_id,
        inserted = result.inserted,
        skipped = result.skipped,
        "Sync completed"
    );

    Ok(Json(SyncResponse {
        message: "Sync completed".to_string(),
        inserted: result.inserted,
        skipped: result.skipped,
        total: result.total,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    pub transactions: Vec<Transaction>,
    pub limit: i64,
    pub offset: i64,
    pub skipped_rows: usize,
}

/// GET /api/v1/transactions - Newest-first page of the caller's transactions
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ListTransactionsQuery>,
) -> Result<Json<TransactionListResponse>, AppError> {
    let page = Pagination::new(params.limit, params.offset);
    let scanned = state.db.list_transactions(user.user_id, page)?;

    Ok(Json(TransactionListResponse {
        transactions: scanned.rows,
        limit: page.limit,
        offset: page.offset,
        skipped_rows: scanned.skipped_rows,
    }))
}
