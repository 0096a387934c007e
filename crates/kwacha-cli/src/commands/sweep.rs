//! One-off insight sweep, the same work the scheduler does at 06:00

use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;

use kwacha_core::ai::AIClient;
use kwacha_core::{run_sweep, Config, Database, InsightGenerator, PushClient, SweepReport};

pub async fn cmd_sweep(db: &Database, config: &Config, json: bool) -> Result<SweepReport> {
    let Some(ai) = AIClient::from_config(&config.ai) else {
        bail!("No AI backend configured. Set GEMINI_API_KEY (or AI_BACKEND=mock).");
    };
    let generator = InsightGenerator::new(ai);

    let push = PushClient::from_config(&config.firebase);
    if push.is_none() && !json {
        println!("   ⚠️  Push disabled: insights are stored but not delivered");
    }

    if !json {
        println!("🔄 Running insight sweep...");
    }

    let delay = Duration::from_millis(config.scheduler.user_delay_ms);
    let report = run_sweep(db, &generator, push.as_ref(), delay, Utc::now()).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("   Users visited:   {}", report.visited);
        println!("   Succeeded:       {}", report.succeeded);
        println!("   Failed:          {}", report.failed);
        println!("   No activity:     {}", report.skipped_empty);
        println!("   Push failures:   {}", report.push_failed);
        println!("   Insights stored: {}", report.insights_stored);
        println!();
        println!("✅ Sweep complete");
    }

    Ok(report)
}
