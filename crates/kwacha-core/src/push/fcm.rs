//! FCM HTTP v1 backend
//!
//! Authenticates with a Google service account: an RS256-signed assertion is
//! exchanged for an OAuth2 access token, which is cached until shortly before
//! it expires.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::FirebaseSettings;
use crate::error::{Error, Result};

use super::{PushBackend, PushData};

const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Multicast sends allowed in flight at once
pub const MULTICAST_CONCURRENCY: usize = 16;
/// Refresh this long before the access token actually expires
const EXPIRY_MARGIN_SECS: i64 = 60;
const CLICK_ACTION: &str = "OPEN_MAIN_ACTIVITY";
const ANDROID_CHANNEL: &str = "kwachatracker_channel";

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a Google service-account key file that FCM needs
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccount {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| {
                Error::Config(format!("failed to decode FIREBASE_CREDENTIALS_BASE64: {}", e))
            })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct FcmBackend {
    http_client: Client,
    base_url: String,
    account: Arc<ServiceAccount>,
    signing_key: Arc<EncodingKey>,
    token_cache: Arc<Mutex<Option<CachedToken>>>,
}

impl FcmBackend {
    pub fn new(account: ServiceAccount, base_url: &str) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())?;
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client with timeout, using default");
                Client::new()
            });

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account: Arc::new(account),
            signing_key: Arc::new(signing_key),
            token_cache: Arc::new(Mutex::new(None)),
        })
    }

    /// Load credentials, preferring the base64 form over the file path
    pub fn from_settings(settings: &FirebaseSettings) -> Result<Self> {
        let encoded = settings
            .credentials_base64
            .as_deref()
            .filter(|s| !s.trim().is_empty());
        let path = settings
            .credentials_path
            .as_deref()
            .filter(|s| !s.trim().is_empty());

        let account = match (encoded, path) {
            (Some(encoded), _) => {
                info!("Using Firebase credentials from environment variable");
                ServiceAccount::from_base64(encoded)?
            }
            (None, Some(path)) => {
                info!(path, "Using Firebase credentials from file");
                ServiceAccount::from_file(Path::new(path))?
            }
            (None, None) => {
                return Err(Error::Config("no Firebase credentials provided".to_string()))
            }
        };

        Self::new(account, &settings.fcm_base_url)
    }

    pub fn project_id(&self) -> &str {
        &self.account.project_id
    }

    fn cached_token(&self, now: DateTime<Utc>) -> Option<String> {
        let cache = self.token_cache.lock().ok()?;
        cache
            .as_ref()
            .filter(|t| t.expires_at > now)
            .map(|t| t.value.clone())
    }

    /// OAuth2 access token for the messaging scope
    async fn access_token(&self) -> Result<String> {
        let now = Utc::now();
        if let Some(token) = self.cached_token(now) {
            return Ok(token);
        }

        let claims = AssertionClaims {
            iss: &self.account.client_email,
            scope: MESSAGING_SCOPE,
            aud: &self.account.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.account.private_key_id.clone();
        let assertion = encode(&header, &claims, &self.signing_key)?;

        let response = self
            .http_client
            .post(&self.account.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Push(format!(
                "OAuth token exchange failed ({}): {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = token.expires_in.max(EXPIRY_MARGIN_SECS) - EXPIRY_MARGIN_SECS;
        if let Ok(mut cache) = self.token_cache.lock() {
            *cache = Some(CachedToken {
                value: token.access_token.clone(),
                expires_at: now + chrono::Duration::seconds(lifetime),
            });
        }
        debug!(expires_in = token.expires_in, "Obtained FCM access token");
        Ok(token.access_token)
    }

    async fn deliver(
        &self,
        access_token: &str,
        token: &str,
        title: &str,
        body: &str,
        data: Option<&PushData>,
        android: bool,
    ) -> Result<()> {
        let mut message = json!({
            "token": token,
            "notification": { "title": title, "body": body },
        });
        if let Some(data) = data.filter(|d| !d.is_empty()) {
            message["data"] = json!(data);
        }
        if android {
            message["android"] = json!({
                "priority": "high",
                "notification": {
                    "click_action": CLICK_ACTION,
                    "channel_id": ANDROID_CHANNEL,
                },
            });
        }

        let response = self
            .http_client
            .post(format!(
                "{}/v1/projects/{}/messages:send",
                self.base_url, self.account.project_id
            ))
            .bearer_auth(access_token)
            .json(&json!({ "message": message }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Push(format!("FCM send failed ({}): {}", status, body)));
        }
        Ok(())
    }
}

#[async_trait]
impl PushBackend for FcmBackend {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: Option<&PushData>,
    ) -> Result<()> {
        let result = async {
            let access = self.access_token().await?;
            self.deliver(&access, token, title, body, data, true).await
        }
        .await;

        match &result {
            Ok(()) => info!(title, "Notification sent"),
            Err(e) => error!(error = %e, "Failed to send notification"),
        }
        result
    }

    async fn send_multicast(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        data: Option<&PushData>,
    ) -> (usize, usize) {
        if tokens.is_empty() {
            return (0, 0);
        }

        let access = match self.access_token().await {
            Ok(access) => access,
            Err(e) => {
                error!(error = %e, recipients = tokens.len(), "Failed to send multicast");
                return (0, tokens.len());
            }
        };

        let deliveries: Vec<_> = tokens
            .iter()
            .map(|t| self.deliver(&access, t, title, body, data, false))
            .collect();
        let results: Vec<Result<()>> = stream::iter(deliveries)
            .buffer_unordered(MULTICAST_CONCURRENCY)
            .collect()
            .await;

        let success = results.iter().filter(|r| r.is_ok()).count();
        for e in results.iter().filter_map(|r| r.as_ref().err()) {
            debug!(error = %e, "Multicast delivery failed");
        }
        info!(success, failure = tokens.len() - success, "Multicast complete");
        (success, tokens.len() - success)
    }
}
