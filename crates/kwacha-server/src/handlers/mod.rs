//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod admin;
pub mod analytics;
pub mod auth;
pub mod health;
pub mod insights;
pub mod sync;

// Re-export all handlers for use in router
pub use admin::*;
pub use analytics::*;
pub use auth::*;
pub use health::*;
pub use insights::*;
pub use sync::*;

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::AppError;

/// Unwrap a JSON body, turning malformed input into a 400
pub(crate) fn parse_json<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::bad_request(&rejection.body_text()))
}
