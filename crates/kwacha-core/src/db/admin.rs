//! Operator statistics and filtered listings

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, ToSql};

use super::insights::{row_to_insight, INSIGHT_COLUMNS};
use super::transactions::{row_to_transaction, TRANSACTION_COLUMNS};
use super::{collect_scanned, format_datetime, parse_datetime, Database};
use crate::error::Result;
use crate::models::{
    AdminInsight, AdminStats, AdminTransaction, AdminUser, ApiUsage, InsightFilter, Page,
    Pagination, TransactionFilter, UserFilter, COST_PER_INSIGHT,
};

fn start_of_day(date: NaiveDate) -> String {
    format_datetime(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
}

fn start_of_day_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
        .timestamp_millis()
}

/// WHERE clause plus its positional parameters
struct Conditions {
    clauses: Vec<&'static str>,
    params: Vec<Box<dyn ToSql>>,
}

impl Conditions {
    fn new() -> Self {
        Self {
            clauses: Vec::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, clause: &'static str, param: Box<dyn ToSql>) {
        self.clauses.push(clause);
        self.params.push(param);
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn refs(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

impl Database {
    /// Usage numbers for the admin dashboard; "today" is the UTC day of `now`
    pub fn admin_stats(&self, now: DateTime<Utc>) -> Result<AdminStats> {
        let conn = self.conn()?;
        let today = start_of_day(now.date_naive());
        let week_ago = format_datetime(now - Duration::days(7));

        let total_users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
        let active_users_7d: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT user_id) FROM transactions WHERE created_at >= ?",
            params![week_ago],
            |r| r.get(0),
        )?;
        let insights_today: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user_insights WHERE generated_at >= ?",
            params![today],
            |r| r.get(0),
        )?;
        let total_transactions: i64 =
            conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))?;
        let notifications_sent_today: i64 = conn.query_row(
            "SELECT COALESCE(SUM(delivered), 0) FROM notification_log WHERE sent_at >= ?",
            params![today],
            |r| r.get(0),
        )?;

        Ok(AdminStats {
            total_users,
            active_users_7d,
            insights_today,
            total_transactions,
            notifications_sent_today,
            api_usage: ApiUsage {
                gemini_requests_today: insights_today,
                estimated_cost: insights_today as f64 * COST_PER_INSIGHT,
            },
        })
    }

    /// Users with per-user counts, newest first
    pub fn admin_users(&self, filter: UserFilter, page: Pagination) -> Result<Page<AdminUser>> {
        let conn = self.conn()?;
        let where_clause = match filter {
            UserFilter::All => "",
            UserFilter::Synced => {
                "WHERE EXISTS (SELECT 1 FROM transactions t WHERE t.user_id = u.id)"
            }
        };

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM users u {}", where_clause),
            [],
            |r| r.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT
                u.id, u.device_id, u.operator, u.is_premium, u.consent_given,
                (u.fcm_token IS NOT NULL AND u.fcm_token != ''),
                (SELECT COUNT(*) FROM transactions t WHERE t.user_id = u.id),
                (SELECT COUNT(*) FROM user_insights i WHERE i.user_id = u.id),
                (SELECT MAX(t.created_at) FROM transactions t WHERE t.user_id = u.id),
                u.created_at
            FROM users u
            {}
            ORDER BY u.created_at DESC, u.id DESC
            LIMIT ? OFFSET ?
            "#,
            where_clause
        ))?;
        let rows = stmt.query_map(params![page.limit, page.offset], |row| {
            let last_sync: Option<String> = row.get(8)?;
            let created_at: String = row.get(9)?;
            Ok(AdminUser {
                id: row.get(0)?,
                device_id: row.get(1)?,
                operator: row.get(2)?,
                is_premium: row.get(3)?,
                consent_given: row.get(4)?,
                has_push_token: row.get(5)?,
                transaction_count: row.get(6)?,
                insight_count: row.get(7)?,
                last_sync: last_sync.as_deref().map(parse_datetime),
                created_at: parse_datetime(&created_at),
            })
        })?;
        let scanned = collect_scanned(rows, "admin user");

        Ok(Page {
            items: scanned.rows,
            total,
            page: page.page(),
            limit: page.limit,
            skipped_rows: scanned.skipped_rows,
        })
    }

    /// Stored insights across users, newest first
    pub fn admin_insights(
        &self,
        filter: &InsightFilter,
        page: Pagination,
    ) -> Result<Page<AdminInsight>> {
        let mut conditions = Conditions::new();
        if let Some(user_id) = filter.user_id {
            conditions.push("i.user_id = ?", Box::new(user_id));
        }
        if let Some(from) = filter.date_from {
            conditions.push("i.generated_at >= ?", Box::new(start_of_day(from)));
        }
        let where_clause = conditions.where_clause();

        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM user_insights i {}", where_clause),
            conditions.refs().as_slice(),
            |r| r.get(0),
        )?;

        let mut params = conditions.refs();
        params.push(&page.limit);
        params.push(&page.offset);

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}, u.device_id
            FROM user_insights i
            JOIN users u ON u.id = i.user_id
            {}
            ORDER BY i.generated_at DESC, i.id DESC
            LIMIT ? OFFSET ?
            "#,
            INSIGHT_COLUMNS, where_clause
        ))?;
        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok(AdminInsight {
                insight: row_to_insight(row)?,
                device_id: row.get(7)?,
            })
        })?;
        let scanned = collect_scanned(rows, "admin insight");

        Ok(Page {
            items: scanned.rows,
            total,
            page: page.page(),
            limit: page.limit,
            skipped_rows: scanned.skipped_rows,
        })
    }

    /// Transactions across users, newest first
    pub fn admin_transactions(
        &self,
        filter: &TransactionFilter,
        page: Pagination,
    ) -> Result<Page<AdminTransaction>> {
        let mut conditions = Conditions::new();
        if let Some(user_id) = filter.user_id {
            conditions.push("t.user_id = ?", Box::new(user_id));
        }
        if let Some(category) = filter.category.as_ref().filter(|c| !c.is_empty()) {
            conditions.push("t.category = ?", Box::new(category.clone()));
        }
        if let Some(from) = filter.date_from {
            conditions.push("t.occurred_at >= ?", Box::new(start_of_day_millis(from)));
        }
        if let Some(to) = filter.date_to {
            // Inclusive of the whole end day
            let next = to.succ_opt().unwrap_or(to);
            conditions.push("t.occurred_at < ?", Box::new(start_of_day_millis(next)));
        }
        let where_clause = conditions.where_clause();

        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM transactions t {}", where_clause),
            conditions.refs().as_slice(),
            |r| r.get(0),
        )?;

        let mut params = conditions.refs();
        params.push(&page.limit);
        params.push(&page.offset);

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}, u.device_id
            FROM transactions t
            JOIN users u ON u.id = t.user_id
            {}
            ORDER BY t.occurred_at DESC, t.id DESC
            LIMIT ? OFFSET ?
            "#,
            TRANSACTION_COLUMNS, where_clause
        ))?;
        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok(AdminTransaction {
                transaction: row_to_transaction(row)?,
                device_id: row.get(13)?,
            })
        })?;
        let scanned = collect_scanned(rows, "admin transaction");

        Ok(Page {
            items: scanned.rows,
            total,
            page: page.page(),
            limit: page.limit,
            skipped_rows: scanned.skipped_rows,
        })
    }
}
