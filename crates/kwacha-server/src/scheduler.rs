//! Daily insight scheduler
//!
//! A background task that sleeps until the configured local time (06:00 by
//! default), runs the insight sweep, and goes back to sleep. The returned
//! [`SchedulerHandle`] can start a sweep immediately or stop the task.
//!
//! - `SCHEDULER_ENABLED`: set to `false` to disable the task
//! - `SCHEDULER_HOUR` / `SCHEDULER_MINUTE`: local run time
//! - `SCHEDULER_USER_DELAY_MS`: pause between users (default 500)

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use kwacha_core::config::SchedulerSettings;
use kwacha_core::{run_sweep, InsightProvider, PushClient, SweepReport, SweepStore};

/// What the scheduler task is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Sleeping,
    Running,
    Stopped,
}

/// Everything one sweep needs
#[derive(Clone)]
pub struct SweepJob {
    pub store: Arc<dyn SweepStore>,
    pub provider: Arc<dyn InsightProvider>,
    pub push: Option<PushClient>,
    pub user_delay: Duration,
}

impl SweepJob {
    pub async fn run(&self) -> SweepReport {
        run_sweep(
            self.store.as_ref(),
            self.provider.as_ref(),
            self.push.as_ref(),
            self.user_delay,
            Utc::now(),
        )
        .await
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    last_report: Mutex<Option<SweepReport>>,
    completed_runs: Mutex<usize>,
}

/// Control handle for a running scheduler task
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger: Arc<Notify>,
    shutdown: Arc<watch::Sender<bool>>,
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Start a sweep now instead of waiting for the next scheduled time
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stop the task; an in-progress sweep finishes first
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn state(&self) -> SchedulerState {
        self.shared
            .state
            .lock()
            .map(|s| *s)
            .unwrap_or(SchedulerState::Stopped)
    }

    pub fn last_report(&self) -> Option<SweepReport> {
        self.shared.last_report.lock().ok().and_then(|r| *r)
    }

    pub fn completed_runs(&self) -> usize {
        self.shared.completed_runs.lock().map(|n| *n).unwrap_or(0)
    }

    fn set_state(&self, state: SchedulerState) {
        if let Ok(mut s) = self.shared.state.lock() {
            *s = state;
        }
    }

    fn finish_run(&self, report: SweepReport) {
        if let Ok(mut last) = self.shared.last_report.lock() {
            *last = Some(report);
        }
        if let Ok(mut runs) = self.shared.completed_runs.lock() {
            *runs += 1;
        }
    }
}

/// Next instant at `hour:minute` strictly after `now`, in `now`'s time zone
///
/// Times skipped by a DST change fall back to the same time one day later.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32, minute: u32) -> DateTime<Tz> {
    let target = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    let local_now = now.naive_local();
    let mut day = local_now.date();
    if day.and_time(target) <= local_now {
        day = day + Days::new(1);
    }

    for _ in 0..3 {
        if let Some(next) = now
            .timezone()
            .from_local_datetime(&day.and_time(target))
            .earliest()
        {
            return next;
        }
        day = day + Days::new(1);
    }
    now.clone() + chrono::Duration::hours(24)
}

/// Spawn the scheduler task
pub fn start_scheduler(
    job: SweepJob,
    settings: &SchedulerSettings,
) -> (SchedulerHandle, JoinHandle<()>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let handle = SchedulerHandle {
        trigger: Arc::new(Notify::new()),
        shutdown: Arc::new(shutdown_tx),
        shared: Arc::new(Shared {
            state: Mutex::new(SchedulerState::Sleeping),
            last_report: Mutex::new(None),
            completed_runs: Mutex::new(0),
        }),
    };

    let (hour, minute) = (settings.hour, settings.minute);
    info!(
        "Daily insight scheduler started (runs at {:02}:{:02} local time)",
        hour, minute
    );

    let task_handle = handle.clone();
    let task = tokio::spawn(async move {
        let handle = task_handle;
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            handle.set_state(SchedulerState::Sleeping);

            let now = Local::now();
            let next = next_run_after(&now, hour, minute);
            let wait = (next.clone() - now).to_std().unwrap_or(Duration::ZERO);
            info!(
                "Next insight sweep at {} (in {}m)",
                next.format("%Y-%m-%d %H:%M"),
                wait.as_secs() / 60
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    info!("Running scheduled insight sweep");
                }
                _ = handle.trigger.notified() => {
                    info!("Running manually triggered insight sweep");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        warn!("Scheduler control handle dropped");
                    }
                    break;
                }
            }

            handle.set_state(SchedulerState::Running);
            let report = job.run().await;
            handle.finish_run(report);
        }

        handle.set_state(SchedulerState::Stopped);
        info!("Daily insight scheduler stopped");
    });

    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use kwacha_core::ai::{AIClient, MockBackend};
    use kwacha_core::{Database, InsightGenerator};

    #[test]
    fn test_next_run_later_today() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 5, 30, 0).unwrap();
        let next = next_run_after(&now, 6, 0);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 15, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_tomorrow_when_passed() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 6, 0, 0).unwrap();
        let next = next_run_after(&now, 6, 0);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 16, 6, 0, 0).unwrap());

        let now = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 0).unwrap();
        let next = next_run_after(&now, 6, 30);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 6, 30, 0).unwrap());
    }

    #[test]
    fn test_next_run_in_local_time() {
        let now = Local::now();
        let next = next_run_after(&now, 6, 0);
        assert!(next > now);
        assert_eq!((next.hour(), next.minute()), (6, 0));
    }

    fn job(db: &Database) -> SweepJob {
        SweepJob {
            store: Arc::new(db.clone()),
            provider: Arc::new(InsightGenerator::new(AIClient::Mock(MockBackend::new()))),
            push: None,
            user_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_trigger_runs_sweep_and_shutdown_stops() {
        let db = Database::in_memory().unwrap();
        let settings = SchedulerSettings::default();
        let (handle, task) = start_scheduler(job(&db), &settings);

        handle.trigger();
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.completed_runs() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(handle.completed_runs(), 1);
        assert_eq!(handle.last_report().unwrap().visited, 0);

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.state(), SchedulerState::Stopped);
    }
}
