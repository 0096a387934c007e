//! Push notification delivery
//!
//! # Architecture
//!
//! - `PushBackend` trait: single and multicast sends
//! - `PushClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `FcmBackend` (FCM HTTP v1), `MockPush`
//!
//! # Configuration
//!
//! - `FIREBASE_CREDENTIALS_BASE64`: base64 service-account JSON (preferred)
//! - `FIREBASE_CREDENTIALS`: path to a service-account JSON file

mod fcm;
mod mock;

pub use fcm::{FcmBackend, ServiceAccount};
pub use mock::{MockPush, SentPush};

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::FirebaseSettings;
use crate::error::Result;

/// String key/value payload delivered alongside the notification
pub type PushData = HashMap<String, String>;

#[async_trait]
pub trait PushBackend: Send + Sync {
    /// Deliver one notification; failures are returned, never retried
    async fn send(&self, token: &str, title: &str, body: &str, data: Option<&PushData>)
        -> Result<()>;

    /// Deliver to many tokens, returning `(success_count, failure_count)`
    async fn send_multicast(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        data: Option<&PushData>,
    ) -> (usize, usize);
}

/// Concrete push client wrapper
#[derive(Clone)]
pub enum PushClient {
    Fcm(FcmBackend),
    Mock(MockPush),
}

impl PushClient {
    /// Build an FCM client from settings
    ///
    /// Returns None (and logs why) when credentials are missing or unusable;
    /// the service keeps running without push.
    pub fn from_config(settings: &FirebaseSettings) -> Option<Self> {
        match FcmBackend::from_settings(settings) {
            Ok(backend) => {
                info!(project = %backend.project_id(), "Firebase Cloud Messaging initialized");
                Some(PushClient::Fcm(backend))
            }
            Err(e) => {
                warn!(error = %e, "FCM not initialized, push notifications disabled");
                None
            }
        }
    }
}

#[async_trait]
impl PushBackend for PushClient {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: Option<&PushData>,
    ) -> Result<()> {
        match self {
            PushClient::Fcm(b) => b.send(token, title, body, data).await,
            PushClient::Mock(b) => b.send(token, title, body, data).await,
        }
    }

    async fn send_multicast(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        data: Option<&PushData>,
    ) -> (usize, usize) {
        match self {
            PushClient::Fcm(b) => b.send_multicast(tokens, title, body, data).await,
            PushClient::Mock(b) => b.send_multicast(tokens, title, body, data).await,
        }
    }
}
