//! Kwacha Core Library
//!
//! Shared functionality for the Kwacha Tracker backend:
//! - Database access and migrations (SQLite, optionally SQLCipher-encrypted)
//! - Transaction sync with per-user deduplication
//! - Spending aggregation and analytics
//! - Insight generation through a pluggable AI backend (Gemini)
//! - Push delivery through Firebase Cloud Messaging
//! - The daily insight sweep
//! - Device bearer tokens and layered configuration

pub mod ai;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod insights;
pub mod models;
pub mod push;
pub mod sweep;

/// Test utilities including mock Gemini and FCM servers
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{AIBackend, AIClient, GeminiBackend, MockBackend};
pub use auth::{issue_token, verify_token, DeviceClaims, IssuedToken};
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use insights::{InsightGenerator, InsightProvider};
pub use push::{FcmBackend, MockPush, PushBackend, PushClient, PushData};
pub use sweep::{run_sweep, SweepReport, SweepStore};
