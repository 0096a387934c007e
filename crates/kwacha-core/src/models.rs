//! Domain models for Kwacha Tracker

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A registered device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub device_id: String,
    pub fcm_token: Option<String>,
    pub operator: String,
    pub is_premium: bool,
    pub consent_given: bool,
    pub consent_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a device registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub user_id: i64,
    pub is_new_user: bool,
}

/// Direction of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INCOME" => Ok(Self::Income),
            "EXPENSE" => Ok(Self::Expense),
            _ => Err(format!("Unknown transaction type: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Category tag used for savings deposits
pub const SAVINGS_CATEGORY: &str = "SAVINGS";

/// A stored mobile-money transaction
///
/// `date` is serialized as Unix epoch milliseconds, matching what devices send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub category: String,
    pub operator: String,
    pub recipient: Option<String>,
    pub balance: Option<f64>,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub sms_hash: i64,
    #[serde(rename = "date", with = "chrono::serde::ts_milliseconds")]
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A transaction as submitted by a device during sync
///
/// `kind` stays a raw string so a bad value fails only its own insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionCandidate {
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub operator: String,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub sms_hash: i64,
    /// Unix epoch milliseconds
    pub date: i64,
}

/// Result of a batch sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub inserted: usize,
    pub skipped: usize,
    pub total: usize,
}

/// Validated page bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 100;
    /// Highest page number admin listings accept; larger requests clamp to it
    pub const MAX_PAGE: i64 = 1_000_000;

    /// Oversized limits clamp to the maximum, non-positive ones fall back to the default
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if l > Self::MAX_LIMIT => Self::MAX_LIMIT,
            Some(l) if l > 0 => l,
            _ => Self::DEFAULT_LIMIT,
        };
        Self {
            limit,
            offset: offset.unwrap_or(0).max(0),
        }
    }

    /// Page-number variant used by admin listings (pages start at 1)
    pub fn from_page(page: Option<i64>, limit: Option<i64>) -> Self {
        let base = Self::new(limit, None);
        let page = page.unwrap_or(1).clamp(1, Self::MAX_PAGE);
        Self {
            limit: base.limit,
            offset: (page - 1).saturating_mul(base.limit),
        }
    }

    pub fn page(&self) -> i64 {
        self.offset / self.limit + 1
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Relative time window anchored at the current instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Yearly,
    All,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::All => "all",
        }
    }

    /// Window length; `None` for an unbounded window
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Daily => Some(Duration::hours(24)),
            Self::Weekly => Some(Duration::days(7)),
            Self::Monthly => Some(Duration::days(30)),
            Self::Yearly => Some(Duration::days(365)),
            Self::All => None,
        }
    }

    pub fn window_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.duration().map(|d| now - d)
    }

    /// Parse an optional query value, falling back to `default` when absent
    pub fn parse_or(value: Option<&str>, default: Period) -> std::result::Result<Self, String> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => v.parse(),
            None => Ok(default),
        }
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" | "day" | "today" => Ok(Self::Daily),
            "weekly" | "week" => Ok(Self::Weekly),
            "monthly" | "month" => Ok(Self::Monthly),
            "yearly" | "year" => Ok(Self::Yearly),
            "all" => Ok(Self::All),
            _ => Err(format!("Unknown period: {}", s)),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-user spending totals over a period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendingAggregate {
    pub user_id: i64,
    pub period: Period,
    pub total_income: f64,
    pub total_expenses: f64,
    pub net_balance: f64,
    pub savings_total: f64,
    pub transaction_count: i64,
    /// Expense totals by category
    pub by_category: BTreeMap<String, f64>,
}

impl SpendingAggregate {
    pub fn empty(user_id: i64, period: Period) -> Self {
        Self {
            user_id,
            period,
            total_income: 0.0,
            total_expenses: 0.0,
            net_balance: 0.0,
            savings_total: 0.0,
            transaction_count: 0,
            by_category: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transaction_count == 0
    }
}

/// Analytics summary returned to devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub period: Period,
    pub total_income: f64,
    pub total_expenses: f64,
    pub net_balance: f64,
    pub transaction_count: i64,
    pub by_category: BTreeMap<String, f64>,
    pub by_operator: BTreeMap<String, f64>,
}

/// One bucket of the income/expense trend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// `YYYY-MM-DD`, or `YYYY-MM` for yearly trends
    pub date: String,
    pub income: f64,
    pub expenses: f64,
    pub net: f64,
}

/// Insight priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Unknown values become `Medium`
    pub fn parse_lossy(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A generated insight, before it is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    pub message: String,
    /// spending, savings, tip or anomaly; free-form when produced by the model
    pub category: String,
    pub priority: Priority,
}

/// A stored insight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInsight {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub category: String,
    pub priority: Priority,
    pub generated_at: DateTime<Utc>,
}

/// Why a push notification was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DailyInsight,
    Broadcast,
    Direct,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyInsight => "daily_insight",
            Self::Broadcast => "broadcast",
            Self::Direct => "direct",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user eligible for the daily sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepCandidate {
    pub user_id: i64,
    pub push_token: String,
}

/// Rows read by a listing query; undecodable rows are skipped and counted
#[derive(Debug, Clone)]
pub struct Scanned<T> {
    pub rows: Vec<T>,
    pub skipped_rows: usize,
}

impl<T> Default for Scanned<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            skipped_rows: 0,
        }
    }
}

// ========== Admin ==========

/// Operator-facing usage numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminStats {
    pub total_users: i64,
    pub active_users_7d: i64,
    pub insights_today: i64,
    pub total_transactions: i64,
    pub notifications_sent_today: i64,
    pub api_usage: ApiUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUsage {
    pub gemini_requests_today: i64,
    /// USD
    pub estimated_cost: f64,
}

/// Estimated Gemini cost per generated insight, USD
pub const COST_PER_INSIGHT: f64 = 0.003;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserFilter {
    #[default]
    All,
    /// Users with at least one transaction
    Synced,
}

impl std::str::FromStr for UserFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "synced" => Ok(Self::Synced),
            _ => Err(format!("Unknown user filter: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: i64,
    pub device_id: String,
    pub operator: String,
    pub is_premium: bool,
    pub consent_given: bool,
    pub has_push_token: bool,
    pub transaction_count: i64,
    pub insight_count: i64,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminInsight {
    #[serde(flatten)]
    pub insight: UserInsight,
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub device_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct InsightFilter {
    pub user_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub user_id: Option<i64>,
    pub category: Option<String>,
    pub date_from: Option<NaiveDate>,
    /// Inclusive
    pub date_to: Option<NaiveDate>,
}

/// One page of an admin listing
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub skipped_rows: usize,
}

/// Recipients of an admin broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastTarget {
    /// Every user with a push token
    All,
    /// Consenting users with a transaction in the last 7 days
    Active,
    Specific(Vec<i64>),
}

impl BroadcastTarget {
    pub fn parse(target: &str, user_ids: Option<Vec<i64>>) -> std::result::Result<Self, String> {
        match target.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "specific" => match user_ids {
                Some(ids) if !ids.is_empty() => Ok(Self::Specific(ids)),
                _ => Err("user_ids required for specific target".to_string()),
            },
            other => Err(format!("Unknown broadcast target: {}", other)),
        }
    }
}
