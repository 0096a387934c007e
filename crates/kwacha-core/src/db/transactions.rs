//! Transaction sync and reads

use rusqlite::{params, Row};
use tracing::{debug, info, warn};

use super::{collect_scanned, millis_to_datetime, parse_datetime, Database};
use crate::error::Result;
use crate::models::{Pagination, Scanned, SyncResult, Transaction, TransactionCandidate};

pub(crate) const TRANSACTION_COLUMNS: &str = "t.id, t.user_id, t.amount, t.kind, t.category, \
     t.operator, t.recipient, t.balance, t.reference, t.description, t.sms_hash, \
     t.occurred_at, t.created_at";

/// Map a row selected with `TRANSACTION_COLUMNS`
pub(crate) fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    let kind: String = row.get(3)?;
    let kind = kind.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    let created_at: String = row.get(12)?;

    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        kind,
        category: row.get(4)?,
        operator: row.get(5)?,
        recipient: row.get(6)?,
        balance: row.get(7)?,
        reference: row.get(8)?,
        description: row.get(9)?,
        sms_hash: row.get(10)?,
        occurred_at: millis_to_datetime(row.get(11)?)?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Ingest a batch of device transactions for one user
    ///
    /// The user must have consented, otherwise nothing is processed. Each
    /// candidate is inserted independently: duplicates of an existing
    /// (user, sms_hash) pair and rows the database rejects are counted as
    /// skipped. All inserts share one datastore transaction; if the commit
    /// fails the whole batch is rejected.
    pub fn sync_transactions(
        &self,
        user_id: i64,
        candidates: &[TransactionCandidate],
    ) -> Result<SyncResult> {
        self.require_consent(user_id)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut result = SyncResult {
            total: candidates.len(),
            ..Default::default()
        };

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO transactions (
                    user_id, amount, kind, category, operator, recipient,
                    balance, reference, description, sms_hash, occurred_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (user_id, sms_hash) DO NOTHING
                "#,
            )?;

            for candidate in candidates {
                let outcome = stmt.execute(params![
                    user_id,
                    candidate.amount,
                    candidate.kind,
                    candidate.category,
                    candidate.operator,
                    candidate.recipient,
                    candidate.balance,
                    candidate.reference,
                    candidate.description,
                    candidate.sms_hash,
                    candidate.date,
                ]);

                match outcome {
                    Ok(0) => {
                        debug!(user_id, sms_hash = candidate.sms_hash, "Duplicate transaction");
                        result.skipped += 1;
                    }
                    Ok(_) => result.inserted += 1,
                    Err(e) => {
                        warn!(
                            user_id,
                            sms_hash = candidate.sms_hash,
                            error = %e,
                            "Rejected transaction during sync"
                        );
                        result.skipped += 1;
                    }
                }
            }
        }

        tx.commit()?;

        info!(
            user_id,
            inserted = result.inserted,
            skipped = result.skipped,
            total = result.total,
            "Sync complete"
        );
        Ok(result)
    }

    /// Newest-first page of a user's transactions
    pub fn list_transactions(&self, user_id: i64, page: Pagination) -> Result<Scanned<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM transactions t
            WHERE t.user_id = ?
            ORDER BY t.occurred_at DESC, t.id DESC
            LIMIT ? OFFSET ?
            "#,
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![user_id, page.limit, page.offset],
            row_to_transaction,
        )?;
        Ok(collect_scanned(rows, "transaction"))
    }

    pub fn count_user_transactions(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
