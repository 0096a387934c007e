//! Device bearer tokens
//!
//! HS256 JWTs issued on registration and checked on every device request.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthSettings;
use crate::error::Result;

/// `iss` claim on every device token
pub const TOKEN_ISSUER: &str = "kwachatracker";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceClaims {
    pub user_id: i64,
    pub device_id: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// A freshly signed token and its lifetime in seconds
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: i64,
}

pub fn issue_token(
    settings: &AuthSettings,
    user_id: i64,
    device_id: &str,
    now: DateTime<Utc>,
) -> Result<IssuedToken> {
    let lifetime = Duration::hours(settings.jwt_expiration_hours);
    let claims = DeviceClaims {
        user_id,
        device_id: device_id.to_string(),
        iat: now.timestamp(),
        exp: (now + lifetime).timestamp(),
        iss: TOKEN_ISSUER.to_string(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )?;

    Ok(IssuedToken {
        token,
        expires_in: lifetime.num_seconds(),
    })
}

/// Check signature, expiry and issuer; returns the embedded claims
pub fn verify_token(settings: &AuthSettings, token: &str) -> Result<DeviceClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[TOKEN_ISSUER]);

    let data = decode::<DeviceClaims>(
        token,
        &DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}
