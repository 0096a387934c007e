//! Database setup shared by every command

use anyhow::{Context, Result};

use kwacha_core::config::DatabaseSettings;
use kwacha_core::db::{Database, DB_KEY_ENV};

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(settings: &DatabaseSettings, no_encrypt: bool) -> Result<Database> {
    if no_encrypt {
        return Database::new_unencrypted(&settings.path)
            .context("Failed to open database (unencrypted)");
    }
    match settings.key.as_deref() {
        Some(key) => Database::new_with_key(&settings.path, Some(key))
            .with_context(|| format!("Failed to open database (check {})", DB_KEY_ENV)),
        None => Database::new(&settings.path).context("Failed to open database"),
    }
}

pub fn cmd_init(settings: &DatabaseSettings, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", settings.path);

    open_db(settings, no_encrypt)?;

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Set JWT_SECRET, GEMINI_API_KEY and FIREBASE_CREDENTIALS");
    println!("  2. Start the API: kwacha serve");

    Ok(())
}
