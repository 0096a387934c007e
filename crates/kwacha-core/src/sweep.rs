//! Daily insight sweep
//!
//! Visits every consenting user with a push token, generates insights from
//! the last 24 hours, stores them and sends one push per user. A failure for
//! one user is logged and counted; the sweep always runs to completion.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::db::{Database, NotificationRecord};
use crate::error::Result;
use crate::insights::{notification_text, InsightProvider};
use crate::models::{Insight, NotificationKind, Period, SpendingAggregate, SweepCandidate};
use crate::push::{PushBackend, PushClient, PushData};

/// Datastore operations the sweep needs
pub trait SweepStore: Send + Sync {
    fn sweep_candidates(&self) -> Result<Vec<SweepCandidate>>;

    fn spending_aggregate(
        &self,
        user_id: i64,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<SpendingAggregate>;

    fn save_insights(&self, user_id: i64, insights: &[Insight]) -> Result<Vec<i64>>;

    fn record_notification(&self, record: &NotificationRecord<'_>) -> Result<()>;
}

impl SweepStore for Database {
    fn sweep_candidates(&self) -> Result<Vec<SweepCandidate>> {
        Database::sweep_candidates(self)
    }

    fn spending_aggregate(
        &self,
        user_id: i64,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<SpendingAggregate> {
        Database::spending_aggregate(self, user_id, period, now)
    }

    fn save_insights(&self, user_id: i64, insights: &[Insight]) -> Result<Vec<i64>> {
        Database::save_insights(self, user_id, insights)
    }

    fn record_notification(&self, record: &NotificationRecord<'_>) -> Result<()> {
        Database::record_notification(self, record)
    }
}

/// Outcome counts for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Candidates examined
    pub visited: usize,
    /// Users whose insights were generated and stored
    pub succeeded: usize,
    /// Users whose aggregation, generation or persistence failed
    pub failed: usize,
    /// Users with no transactions in the window
    pub skipped_empty: usize,
    /// Stored users whose push could not be delivered
    pub push_failed: usize,
    pub insights_stored: usize,
}

enum UserOutcome {
    Empty,
    Stored { insights: usize, pushed: Option<bool> },
}

/// Run one sweep over all candidates
///
/// `delay` is slept after every user that reached generation, pacing calls
/// to the external services.
pub async fn run_sweep(
    store: &dyn SweepStore,
    provider: &dyn InsightProvider,
    push: Option<&PushClient>,
    delay: Duration,
    now: DateTime<Utc>,
) -> SweepReport {
    let mut report = SweepReport::default();

    let candidates = match store.sweep_candidates() {
        Ok(candidates) => candidates,
        Err(e) => {
            error!(error = %e, "Failed to load sweep candidates");
            return report;
        }
    };
    info!(users = candidates.len(), "Starting daily insight sweep");

    for candidate in &candidates {
        report.visited += 1;

        match sweep_user(store, provider, push, candidate, now).await {
            Ok(UserOutcome::Empty) => {
                report.skipped_empty += 1;
                continue;
            }
            Ok(UserOutcome::Stored { insights, pushed }) => {
                report.succeeded += 1;
                report.insights_stored += insights;
                if pushed == Some(false) {
                    report.push_failed += 1;
                }
            }
            Err(e) => {
                warn!(user_id = candidate.user_id, error = %e, "Insight sweep failed for user");
                report.failed += 1;
            }
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    info!(
        visited = report.visited,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped_empty = report.skipped_empty,
        push_failed = report.push_failed,
        "Daily insight sweep complete"
    );
    report
}

async fn sweep_user(
    store: &dyn SweepStore,
    provider: &dyn InsightProvider,
    push: Option<&PushClient>,
    candidate: &SweepCandidate,
    now: DateTime<Utc>,
) -> Result<UserOutcome> {
    let user_id = candidate.user_id;
    let aggregate = store.spending_aggregate(user_id, Period::Daily, now)?;
    if aggregate.is_empty() {
        debug!(user_id, "No transactions in the last 24h, skipping");
        return Ok(UserOutcome::Empty);
    }

    let insights = provider.generate(&aggregate).await?;
    store.save_insights(user_id, &insights)?;

    let pushed = match push {
        Some(push) => Some(send_daily_push(store, push, candidate, &insights).await),
        None => None,
    };

    Ok(UserOutcome::Stored {
        insights: insights.len(),
        pushed,
    })
}

async fn send_daily_push(
    store: &dyn SweepStore,
    push: &PushClient,
    candidate: &SweepCandidate,
    insights: &[Insight],
) -> bool {
    let (title, body) = notification_text(insights);
    let mut data = PushData::new();
    data.insert("type".to_string(), NotificationKind::DailyInsight.as_str().to_string());

    let result = push
        .send(&candidate.push_token, &title, &body, Some(&data))
        .await;
    let error = result.as_ref().err().map(|e| e.to_string());
    if let Some(e) = &error {
        warn!(user_id = candidate.user_id, error = %e, "Push failed");
    }

    let record = NotificationRecord {
        user_id: Some(candidate.user_id),
        kind: NotificationKind::DailyInsight,
        recipients: 1,
        delivered: usize::from(result.is_ok()),
        error: error.as_deref(),
    };
    if let Err(e) = store.record_notification(&record) {
        warn!(user_id = candidate.user_id, error = %e, "Failed to log notification");
    }

    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::ai::{AIClient, MockBackend};
    use crate::error::Error;
    use crate::insights::InsightGenerator;
    use crate::models::{Priority, TransactionCandidate};
    use crate::push::MockPush;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 6, 0, 0).unwrap()
    }

    fn busy_aggregate(user_id: i64) -> SpendingAggregate {
        let mut agg = SpendingAggregate::empty(user_id, Period::Daily);
        agg.total_income = 100.0;
        agg.total_expenses = 40.0;
        agg.net_balance = 60.0;
        agg.transaction_count = 3;
        agg
    }

    fn insight(title: &str) -> Insight {
        Insight {
            title: title.to_string(),
            message: "m".to_string(),
            category: "tip".to_string(),
            priority: Priority::High,
        }
    }

    #[derive(Default)]
    struct FakeStore {
        candidates: Vec<SweepCandidate>,
        empty_users: HashSet<i64>,
        broken_users: HashSet<i64>,
        saved: Mutex<HashMap<i64, Vec<Insight>>>,
        notifications: Mutex<Vec<(Option<i64>, usize, Option<String>)>>,
    }

    impl FakeStore {
        fn with_users(ids: &[i64]) -> Self {
            Self {
                candidates: ids
                    .iter()
                    .map(|&id| SweepCandidate {
                        user_id: id,
                        push_token: format!("token-{}", id),
                    })
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl SweepStore for FakeStore {
        fn sweep_candidates(&self) -> Result<Vec<SweepCandidate>> {
            Ok(self.candidates.clone())
        }

        fn spending_aggregate(
            &self,
            user_id: i64,
            period: Period,
            _now: DateTime<Utc>,
        ) -> Result<SpendingAggregate> {
            if self.broken_users.contains(&user_id) {
                return Err(Error::InvalidData("corrupt aggregate".into()));
            }
            if self.empty_users.contains(&user_id) {
                return Ok(SpendingAggregate::empty(user_id, period));
            }
            Ok(busy_aggregate(user_id))
        }

        fn save_insights(&self, user_id: i64, insights: &[Insight]) -> Result<Vec<i64>> {
            let mut saved = self.saved.lock().unwrap();
            saved.entry(user_id).or_default().extend_from_slice(insights);
            Ok((0..insights.len() as i64).collect())
        }

        fn record_notification(&self, record: &NotificationRecord<'_>) -> Result<()> {
            self.notifications.lock().unwrap().push((
                record.user_id,
                record.delivered,
                record.error.map(String::from),
            ));
            Ok(())
        }
    }

    /// Generation outcome chosen per user id
    struct StubProvider {
        failing: HashSet<i64>,
        calls: Mutex<Vec<i64>>,
    }

    impl StubProvider {
        fn failing_for(ids: &[i64]) -> Self {
            Self {
                failing: ids.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InsightProvider for StubProvider {
        async fn generate(&self, aggregate: &SpendingAggregate) -> Result<Vec<Insight>> {
            self.calls.lock().unwrap().push(aggregate.user_id);
            if self.failing.contains(&aggregate.user_id) {
                return Err(Error::Ai(format!("stub failure for {}", aggregate.user_id)));
            }
            Ok(vec![insight(&format!("for user {}", aggregate.user_id))])
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_sweep() {
        let store = FakeStore::with_users(&[1, 2, 3]);
        let provider = StubProvider::failing_for(&[2]);
        let push = PushClient::Mock(MockPush::new());

        let report = run_sweep(&store, &provider, Some(&push), Duration::ZERO, now()).await;

        assert_eq!(report.visited, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(*provider.calls.lock().unwrap(), vec![1, 2, 3]);

        let saved = store.saved.lock().unwrap();
        assert!(saved.contains_key(&1));
        assert!(!saved.contains_key(&2));
        assert!(saved.contains_key(&3));

        let PushClient::Mock(mock) = &push else { unreachable!() };
        let tokens: Vec<_> = mock.sent().into_iter().map(|s| s.token).collect();
        assert_eq!(tokens, vec!["token-1", "token-3"]);
    }

    #[tokio::test]
    async fn test_empty_and_broken_users() {
        let mut store = FakeStore::with_users(&[1, 2, 3]);
        store.empty_users.insert(1);
        store.broken_users.insert(2);
        let provider = StubProvider::failing_for(&[]);

        let report = run_sweep(&store, &provider, None, Duration::ZERO, now()).await;

        assert_eq!(report.skipped_empty, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(*provider.calls.lock().unwrap(), vec![3]);
        assert!(store.notifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_failure_keeps_insights() {
        let store = FakeStore::with_users(&[1]);
        let provider = StubProvider::failing_for(&[]);
        let mock = MockPush::new();
        mock.fail_token("token-1");
        let push = PushClient::Mock(mock);

        let report = run_sweep(&store, &provider, Some(&push), Duration::ZERO, now()).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.push_failed, 1);
        assert_eq!(store.saved.lock().unwrap()[&1].len(), 1);

        let log = store.notifications.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, Some(1));
        assert_eq!(log[0].1, 0);
        assert!(log[0].2.is_some());
    }

    #[tokio::test]
    async fn test_sweep_against_database() {
        let db = Database::in_memory().unwrap();
        let reg = db.register_device("phone-1", Some("fcm-1"), Some("MTN")).unwrap();
        db.set_consent(reg.user_id, true).unwrap();
        db.sync_transactions(
            reg.user_id,
            &[TransactionCandidate {
                amount: 250.0,
                kind: "EXPENSE".into(),
                category: "FOOD".into(),
                operator: "MTN".into(),
                recipient: None,
                balance: None,
                reference: None,
                description: None,
                sms_hash: 99,
                date: (now() - chrono::Duration::hours(2)).timestamp_millis(),
            }],
        )
        .unwrap();

        let quiet = db.register_device("phone-2", Some("fcm-2"), None).unwrap();
        db.set_consent(quiet.user_id, true).unwrap();

        let mock_ai = MockBackend::new();
        let generator = InsightGenerator::new(AIClient::Mock(mock_ai.clone()));
        let mock_push = MockPush::new();
        let push = PushClient::Mock(mock_push.clone());

        let report = run_sweep(&db, &generator, Some(&push), Duration::ZERO, now()).await;

        assert_eq!(report.visited, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped_empty, 1);
        assert_eq!(mock_ai.calls(), 1);

        let stored = db.recent_insights(reg.user_id, 10).unwrap();
        assert_eq!(stored.rows.len(), 2);

        let sent = mock_push.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].token, "fcm-1");
        assert_eq!(sent[0].title, "Food is your top spend");
        assert_eq!(
            sent[0].data.as_ref().unwrap()["type"],
            "daily_insight"
        );
    }
}
