//! Device registration, consent and data deletion

use std::sync::Arc;

use axum::{extract::rejection::JsonRejection, extract::State, Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use kwacha_core::issue_token;

use super::parse_json;
use crate::{AppError, AppState, AuthUser};

/// Request body for device registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub device_id: String,
    pub fcm_token: Option<String>,
    pub operator: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub token: String,
    pub is_new_user: bool,
    /// Token lifetime in seconds
    pub expires_in: i64,
}

/// POST /api/v1/register - Register a device (or refresh a known one) and issue a token
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, AppError> {
    let req = parse_json(payload)?;
    let device_id = req.device_id.trim();
    if device_id.is_empty() {
        return Err(AppError::bad_request("device_id is required"));
    }

    let registration = state.db.register_device(
        device_id,
        req.fcm_token.as_deref(),
        req.operator.as_deref(),
    )?;
    let issued = issue_token(&state.config.auth, registration.user_id, device_id, Utc::now())?;

    if registration.is_new_user {
        info!(user_id = registration.user_id, "New device registered");
    }

    Ok(Json(RegisterResponse {
        user_id: registration.user_id,
        token: issued.token,
        is_new_user: registration.is_new_user,
        expires_in: issued.expires_in,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    pub consent_given: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ConsentResponse {
    pub message: String,
    pub consent_given: bool,
}

/// PUT /api/v1/consent - Grant or withdraw consent for data processing
pub async fn update_consent(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<ConsentRequest>, JsonRejection>,
) -> Result<Json<ConsentResponse>, AppError> {
    let consent_given = parse_json(payload)?
        .consent_given
        .ok_or_else(|| AppError::bad_request("consent_given is required"))?;

    state.db.set_consent(user.user_id, consent_given)?;
    info!(user_id = user.user_id, consent_given, "Consent updated");

    Ok(Json(ConsentResponse {
        message: "Consent updated".to_string(),
        consent_given,
    }))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// DELETE /api/v1/data - Delete the caller's insights, transactions and account
pub async fn delete_data(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<MessageResponse>, AppError> {
    state.db.delete_user_data(user.user_id)?;
    info!(user_id = user.user_id, "User data deleted");

    Ok(Json(MessageResponse {
        message: "All user data deleted".to_string(),
    }))
}
