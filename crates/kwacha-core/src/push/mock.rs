//! In-memory push backend for tests

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::{PushBackend, PushData};

/// A notification accepted by `MockPush`
#[derive(Debug, Clone, PartialEq)]
pub struct SentPush {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: Option<PushData>,
}

#[derive(Default)]
struct MockPushState {
    sent: Vec<SentPush>,
    failing_tokens: HashSet<String>,
    fail_all: bool,
}

/// Records every delivery; clones share the same log
#[derive(Clone, Default)]
pub struct MockPush {
    state: Arc<Mutex<MockPushState>>,
}

impl MockPush {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject sends to this token
    pub fn fail_token(&self, token: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_tokens.insert(token.to_string());
        }
    }

    /// Reject every send, as if credentials were revoked
    pub fn fail_all(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_all = true;
        }
    }

    pub fn sent(&self) -> Vec<SentPush> {
        self.state
            .lock()
            .map(|s| s.sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PushBackend for MockPush {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: Option<&PushData>,
    ) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Push("mock push state poisoned".to_string()))?;
        if state.fail_all || state.failing_tokens.contains(token) {
            return Err(Error::Push(format!("mock rejected token {}", token)));
        }
        state.sent.push(SentPush {
            token: token.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            data: data.cloned(),
        });
        Ok(())
    }

    async fn send_multicast(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        data: Option<&PushData>,
    ) -> (usize, usize) {
        let mut ok = 0;
        for token in tokens {
            if self.send(token, title, body, data).await.is_ok() {
                ok += 1;
            }
        }
        (ok, tokens.len() - ok)
    }
}
