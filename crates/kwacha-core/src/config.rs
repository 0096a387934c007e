//! Service configuration
//!
//! Settings are resolved in three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. An optional TOML file (`--config` / `KWACHA_CONFIG`)
//! 3. Environment variables
//!
//! ```toml
//! [server]
//! port = 8080
//! rate_limit_per_minute = 100
//!
//! [auth]
//! jwt_secret = "..."
//!
//! [scheduler]
//! hour = 6
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Secret used when none is configured. Rejected in production.
pub const DEFAULT_JWT_SECRET: &str = "change-me-in-production";

/// Environment variable pointing at a TOML config file
pub const CONFIG_PATH_ENV: &str = "KWACHA_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    pub ai: AiSettings,
    pub firebase: FirebaseSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// `development` or `production`
    pub environment: String,
    /// Allowed CORS origins. Empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Proxies whose X-Forwarded-For header is trusted (IPs or CIDRs)
    pub trusted_proxies: Vec<String>,
    /// Requests per client IP per minute
    pub rate_limit_per_minute: u32,
    /// API keys for the admin surface. Empty leaves it unauthenticated.
    pub admin_api_keys: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: "development".to_string(),
            allowed_origins: vec![],
            trusted_proxies: vec![],
            rate_limit_per_minute: 100,
            admin_api_keys: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
    /// SQLCipher passphrase
    pub key: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "kwacha.db".to_string(),
            key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            jwt_expiration_hours: 720,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    /// `gemini` or `mock`
    pub backend: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub timeout_secs: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            backend: "gemini".to_string(),
            gemini_api_key: None,
            gemini_model: "gemini-2.5-flash".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirebaseSettings {
    /// Path to a service-account JSON file
    pub credentials_path: Option<String>,
    /// Base64 service-account JSON. Takes precedence over the path.
    pub credentials_base64: Option<String>,
    /// Override for the FCM API host (tests)
    pub fcm_base_url: String,
}

impl Default for FirebaseSettings {
    fn default() -> Self {
        Self {
            credentials_path: Some("./firebase-credentials.json".to_string()),
            credentials_base64: None,
            fcm_base_url: "https://fcm.googleapis.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub enabled: bool,
    /// Local hour of the daily run
    pub hour: u32,
    pub minute: u32,
    /// Pause between users during a sweep
    pub user_delay_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 6,
            minute: 0,
            user_delay_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(|p| p.to_path_buf())
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(Into::into));

        let mut config = match file {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file; missing sections keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Overlay values from an environment lookup
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(v) = parse_env(&get, "PORT") {
            self.server.port = v;
        }
        if let Some(v) = get("ENVIRONMENT") {
            self.server.environment = v;
        }
        if let Some(v) = get("KWACHA_ALLOWED_ORIGINS") {
            self.server.allowed_origins = split_list(&v);
        }
        if let Some(v) = get("KWACHA_TRUSTED_PROXIES") {
            self.server.trusted_proxies = split_list(&v);
        }
        if let Some(v) = parse_env(&get, "RATE_LIMIT_PER_MINUTE") {
            self.server.rate_limit_per_minute = v;
        }
        if let Some(v) = get("KWACHA_ADMIN_API_KEYS") {
            self.server.admin_api_keys = split_list(&v);
        }

        if let Some(v) = get("DATABASE_PATH") {
            self.database.path = v;
        }
        if let Some(v) = get(crate::db::DB_KEY_ENV) {
            self.database.key = Some(v);
        }

        if let Some(v) = get("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Some(v) = parse_env(&get, "JWT_EXPIRATION_HOURS") {
            self.auth.jwt_expiration_hours = v;
        }

        if let Some(v) = get("AI_BACKEND") {
            self.ai.backend = v.to_lowercase();
        }
        if let Some(v) = get("GEMINI_API_KEY") {
            self.ai.gemini_api_key = Some(v);
        }
        if let Some(v) = get("GEMINI_MODEL") {
            self.ai.gemini_model = v;
        }
        if let Some(v) = get("GEMINI_BASE_URL") {
            self.ai.gemini_base_url = v;
        }

        if let Some(v) = get("FIREBASE_CREDENTIALS") {
            self.firebase.credentials_path = Some(v);
        }
        if let Some(v) = get("FIREBASE_CREDENTIALS_BASE64") {
            self.firebase.credentials_base64 = Some(v);
        }

        if let Some(v) = parse_env(&get, "SCHEDULER_ENABLED") {
            self.scheduler.enabled = v;
        }
        if let Some(v) = parse_env(&get, "SCHEDULER_HOUR") {
            self.scheduler.hour = v;
        }
        if let Some(v) = parse_env(&get, "SCHEDULER_MINUTE") {
            self.scheduler.minute = v;
        }
        if let Some(v) = parse_env(&get, "SCHEDULER_USER_DELAY_MS") {
            self.scheduler.user_delay_ms = v;
        }
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.hour > 23 || self.scheduler.minute > 59 {
            return Err(Error::Config(format!(
                "Invalid scheduler time {:02}:{:02}",
                self.scheduler.hour, self.scheduler.minute
            )));
        }
        if self.auth.jwt_expiration_hours <= 0 {
            return Err(Error::Config(
                "JWT_EXPIRATION_HOURS must be positive".to_string(),
            ));
        }
        if self.auth.jwt_secret == DEFAULT_JWT_SECRET {
            if self.is_production() {
                return Err(Error::Config(
                    "JWT_SECRET must be set in production".to_string(),
                ));
            }
            warn!("Using default JWT secret - set JWT_SECRET before deploying");
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.environment.eq_ignore_ascii_case("production")
    }
}

fn parse_env<F, T>(get: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
