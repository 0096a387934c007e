//! Pluggable text-generation backend abstraction
//!
//! # Architecture
//!
//! - `AIBackend` trait: the single text-generation operation plus health
//! - `AIClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `GeminiBackend`, `MockBackend`
//!
//! # Configuration
//!
//! - `AI_BACKEND`: Backend to use (gemini, mock). Default: gemini
//! - `GEMINI_API_KEY`: required for the gemini backend
//! - `GEMINI_MODEL`: model name (default: gemini-2.5-flash)
//! - `GEMINI_BASE_URL`: API host override

mod gemini;
mod mock;
pub mod parsing;

pub use gemini::GeminiBackend;
pub use mock::MockBackend;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::AiSettings;
use crate::error::Result;

/// Trait defining the interface for all text-generation backends
#[async_trait]
pub trait AIBackend: Send + Sync {
    /// Send a prompt and return the raw response text
    ///
    /// Single attempt; transport failures and non-success statuses are errors.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Model name used for generation
    fn model(&self) -> &str;

    /// Host the backend talks to
    fn host(&self) -> &str;
}

/// Concrete AI client wrapper
#[derive(Clone)]
pub enum AIClient {
    Gemini(GeminiBackend),
    Mock(MockBackend),
}

impl AIClient {
    /// Build a client from settings
    ///
    /// Returns None when the selected backend is not configured.
    pub fn from_config(settings: &AiSettings) -> Option<Self> {
        match settings.backend.as_str() {
            "gemini" => match GeminiBackend::from_config(settings) {
                Some(backend) => {
                    info!(model = %settings.gemini_model, "Gemini backend configured");
                    Some(AIClient::Gemini(backend))
                }
                None => {
                    info!("AI backend not configured (set GEMINI_API_KEY to enable insights)");
                    None
                }
            },
            "mock" => Some(AIClient::Mock(MockBackend::new())),
            other => {
                warn!(backend = other, "Unknown AI_BACKEND, AI disabled");
                None
            }
        }
    }

    /// Create a mock client (for testing)
    pub fn mock() -> Self {
        AIClient::Mock(MockBackend::new())
    }
}

#[async_trait]
impl AIBackend for AIClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        match self {
            AIClient::Gemini(b) => b.generate(prompt).await,
            AIClient::Mock(b) => b.generate(prompt).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            AIClient::Gemini(b) => b.health_check().await,
            AIClient::Mock(b) => b.health_check().await,
        }
    }

    fn model(&self) -> &str {
        match self {
            AIClient::Gemini(b) => b.model(),
            AIClient::Mock(b) => b.model(),
        }
    }

    fn host(&self) -> &str {
        match self {
            AIClient::Gemini(b) => b.host(),
            AIClient::Mock(b) => b.host(),
        }
    }
}
