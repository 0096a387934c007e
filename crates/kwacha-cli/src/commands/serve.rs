//! Server command implementation

use anyhow::Result;

use kwacha_core::Config;

use super::open_db;

pub async fn cmd_serve(config: Config, no_encrypt: bool) -> Result<()> {
    println!("🚀 Starting Kwacha Tracker API...");
    println!("   Database: {}", config.database.path);
    println!(
        "   Listening: http://{}:{}",
        config.server.host, config.server.port
    );
    println!("   Environment: {}", config.server.environment);

    if config.scheduler.enabled {
        println!(
            "   ⏰ Daily insights: {:02}:{:02} local time",
            config.scheduler.hour, config.scheduler.minute
        );
    } else {
        println!("   ⏰ Daily insights: disabled");
    }
    if !config.server.admin_api_keys.is_empty() {
        println!(
            "   🔑 Admin API keys: {} configured (KWACHA_ADMIN_API_KEYS)",
            config.server.admin_api_keys.len()
        );
    }
    if !config.server.trusted_proxies.is_empty() {
        println!(
            "   🔀 Trusted proxies: {} (KWACHA_TRUSTED_PROXIES)",
            config.server.trusted_proxies.join(", ")
        );
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(&config.database, no_encrypt)?;
    kwacha_server::serve_with_config(db, config).await
}
