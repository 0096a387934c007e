//! Mock backend for testing
//!
//! Returns a fixed, well-formed insight array unless configured otherwise,
//! and counts calls so tests can assert that no generation happened.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::AIBackend;

const DEFAULT_RESPONSE: &str = r#"```json
[
  {"title": "Food is your top spend", "message": "Most of your spending went on food this period. Try planning meals to save K50 a week.", "category": "spending", "priority": "high"},
  {"title": "Keep saving", "message": "Small regular deposits add up. Set aside K20 after each payday.", "category": "tip", "priority": "medium"}
]
```"#;

/// Mock AI backend for testing
#[derive(Clone)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
    /// Canned response; None makes every call fail
    response: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a new mock backend (healthy by default)
    pub fn new() -> Self {
        Self {
            healthy: true,
            response: Some(DEFAULT_RESPONSE.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Mock that always answers with `response`
    pub fn with_response(response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
            ..Self::new()
        }
    }

    /// Mock whose generate calls always fail
    pub fn failing() -> Self {
        Self {
            healthy: false,
            response: None,
            ..Self::new()
        }
    }

    /// Number of generate calls made so far (shared across clones)
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response
            .clone()
            .ok_or_else(|| Error::Ai("mock backend configured to fail".to_string()))
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}
