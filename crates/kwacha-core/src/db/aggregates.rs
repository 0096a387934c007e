//! Spending aggregates and analytics
//!
//! Every figure is computed fresh from the transactions table over the window
//! `[now - period, now]`. Nothing here is cached.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::Database;
use crate::error::Result;
use crate::models::{AnalyticsSummary, Period, SpendingAggregate, TrendPoint, SAVINGS_CATEGORY};

/// Window bounds in epoch milliseconds
fn window_millis(period: Period, now: DateTime<Utc>) -> (i64, i64) {
    let start = period
        .window_start(now)
        .map(|s| s.timestamp_millis())
        .unwrap_or(i64::MIN);
    (start, now.timestamp_millis())
}

impl Database {
    /// Income, expenses, savings and category breakdown for one user
    pub fn spending_aggregate(
        &self,
        user_id: i64,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<SpendingAggregate> {
        let (start, end) = window_millis(period, now);
        let conn = self.conn()?;

        let (total_income, total_expenses, savings_total, transaction_count): (f64, f64, f64, i64) =
            conn.query_row(
                r#"
                SELECT
                    COALESCE(SUM(CASE WHEN kind = 'INCOME' THEN amount ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN kind = 'EXPENSE' THEN amount ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN kind = 'EXPENSE' AND category = ? THEN amount ELSE 0 END), 0),
                    COUNT(*)
                FROM transactions
                WHERE user_id = ? AND occurred_at >= ? AND occurred_at <= ?
                "#,
                params![SAVINGS_CATEGORY, user_id, start, end],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let mut stmt = conn.prepare(
            r#"
            SELECT category, SUM(amount) FROM transactions
            WHERE user_id = ? AND kind = 'EXPENSE' AND occurred_at >= ? AND occurred_at <= ?
            GROUP BY category
            "#,
        )?;
        let by_category = stmt
            .query_map(params![user_id, start, end], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        Ok(SpendingAggregate {
            user_id,
            period,
            total_income,
            total_expenses,
            net_balance: total_income - total_expenses,
            savings_total,
            transaction_count,
            by_category,
        })
    }

    /// Device-facing summary: the aggregate plus an operator breakdown
    pub fn analytics_summary(
        &self,
        user_id: i64,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<AnalyticsSummary> {
        let aggregate = self.spending_aggregate(user_id, period, now)?;
        let (start, end) = window_millis(period, now);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT operator, SUM(amount) FROM transactions
            WHERE user_id = ? AND occurred_at >= ? AND occurred_at <= ?
            GROUP BY operator
            "#,
        )?;
        let by_operator = stmt
            .query_map(params![user_id, start, end], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        Ok(AnalyticsSummary {
            period,
            total_income: aggregate.total_income,
            total_expenses: aggregate.total_expenses,
            net_balance: aggregate.net_balance,
            transaction_count: aggregate.transaction_count,
            by_category: aggregate.by_category,
            by_operator,
        })
    }

    /// Income/expense series, oldest bucket first
    ///
    /// Buckets are UTC calendar days, or months for yearly trends.
    pub fn spending_trends(
        &self,
        user_id: i64,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrendPoint>> {
        let (start, end) = window_millis(period, now);
        let bucket = match period {
            Period::Yearly => "%Y-%m",
            _ => "%Y-%m-%d",
        };

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                strftime(?, occurred_at / 1000, 'unixepoch') AS bucket,
                COALESCE(SUM(CASE WHEN kind = 'INCOME' THEN amount ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN kind = 'EXPENSE' THEN amount ELSE 0 END), 0)
            FROM transactions
            WHERE user_id = ? AND occurred_at >= ? AND occurred_at <= ?
            GROUP BY bucket
            ORDER BY bucket ASC
            "#,
        )?;
        let points = stmt
            .query_map(params![bucket, user_id, start, end], |row| {
                let income: f64 = row.get(1)?;
                let expenses: f64 = row.get(2)?;
                Ok(TrendPoint {
                    date: row.get(0)?,
                    income,
                    expenses,
                    net: income - expenses,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(points)
    }
}
