//! Insight generation
//!
//! Turns a `SpendingAggregate` into at most three short, actionable insights.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kwacha_core::insights::{InsightGenerator, InsightProvider};
//!
//! let generator = InsightGenerator::new(ai_client);
//! let aggregate = db.spending_aggregate(user_id, Period::Daily, Utc::now())?;
//! let insights = generator.generate(&aggregate).await?;
//! ```

mod generator;

pub use generator::{build_prompt, fallback_insights, notification_text, InsightGenerator};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Insight, SpendingAggregate};

/// Anything that can produce insights for an aggregate
#[async_trait]
pub trait InsightProvider: Send + Sync {
    /// Empty aggregates yield an empty list without contacting any service.
    /// Service failures are errors; unusable responses degrade to fallbacks.
    async fn generate(&self, aggregate: &SpendingAggregate) -> Result<Vec<Insight>>;
}
