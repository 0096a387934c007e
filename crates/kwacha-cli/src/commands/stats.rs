//! Usage statistics

use anyhow::Result;
use chrono::Utc;

use kwacha_core::Database;

pub fn cmd_stats(db: &Database, json: bool) -> Result<()> {
    let stats = db.admin_stats(Utc::now())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!();
    println!("╭─────────────────────────────────────────╮");
    println!("│         💰 Kwacha Tracker Stats         │");
    println!("╰─────────────────────────────────────────╯");
    println!();
    println!("  Users:              {}", stats.total_users);
    println!("  Active (7 days):    {}", stats.active_users_7d);
    println!("  Transactions:       {}", stats.total_transactions);
    println!("  Insights today:     {}", stats.insights_today);
    println!("  Pushes today:       {}", stats.notifications_sent_today);
    println!();
    println!(
        "  Gemini requests today: {} (~${:.3})",
        stats.api_usage.gemini_requests_today, stats.api_usage.estimated_cost
    );
    println!();

    Ok(())
}
