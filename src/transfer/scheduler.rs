use super::engine::{LogEvents, TransferEngine};
use super::{classifier, Schedule, ScheduleKind, Task, TaskError, TransferError};
use crate::storage::Storage;
use crate::utils::config::Config;
use anyhow::Result;
use chrono::{DateTime, Datelike, Days, Local, TimeZone};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Wider delay after a poll cycle fails outright, so a systemic
    /// failure does not hot-loop.
    pub poll_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            poll_backoff: Duration::from_secs(300),
        }
    }
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            poll_backoff: Duration::from_secs(config.poll_backoff_secs),
        }
    }
}

/// Long-lived polling loop that evaluates recurring tasks' due-ness and
/// hands due tasks to the transfer engine, one at a time. Polls never
/// overlap: the loop awaits each cycle before sleeping for the next.
pub struct Scheduler {
    storage: Storage,
    engine: TransferEngine,
    config: SchedulerConfig,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        storage: Storage,
        engine: TransferEngine,
        config: SchedulerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            storage,
            engine,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            "Scheduler started (interval {:?}, backoff {:?})",
            self.config.poll_interval, self.config.poll_backoff
        );

        loop {
            let delay = match self.poll_once().await {
                Ok(executed) => {
                    if executed > 0 {
                        debug!("Poll cycle executed {} task(s)", executed);
                    }
                    self.config.poll_interval
                }
                Err(e) => {
                    error!("Poll cycle failed, backing off: {:#}", e);
                    self.config.poll_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("Scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One poll cycle: run every due task, advance its schedule, persist
    /// it. A failing task is logged and the cycle continues with the
    /// next one.
    pub async fn poll_once(&self) -> Result<usize> {
        let tasks = self.storage.list_scheduled_tasks().await?;
        let now = Local::now();
        let mut executed = 0;

        for mut task in tasks {
            if !is_due(&task.schedule, now) {
                continue;
            }
            executed += 1;
            info!("Running scheduled task {} ({})", task.id, task.source);

            match self.engine.run(&task, &mut LogEvents).await {
                Ok(outcome) => {
                    info!(
                        "Scheduled task {} moved {} file(s)",
                        task.id, outcome.summary.file_count
                    );
                    for failure in &outcome.failures {
                        warn!(
                            "Scheduled task {}: {} failed: {}",
                            task.id, failure.name, failure.error
                        );
                    }
                }
                Err(TaskError::Transfer(TransferError::NoMatch)) => {
                    info!("Scheduled task {} matched no files", task.id);
                }
                Err(e) => {
                    let event = classifier::classify(&e);
                    error!("Scheduled task {} failed ({:?}): {}", task.id, event, e);
                }
            }

            advance_schedule(&mut task, now);
            if let Err(e) = self.storage.update_task(&task).await {
                error!("Failed to persist task {} after run: {:#}", task.id, e);
            }
        }

        Ok(executed)
    }
}

/// Whether a schedule is due at `now`.
///
/// Once: the stored datetime has passed. Daily: the datetime has passed
/// and the time-of-day has been reached. Weekly: additionally the
/// weekday matches.
pub fn is_due(schedule: &Schedule, now: DateTime<Local>) -> bool {
    let Some(next_ms) = schedule.next_run_time else {
        return false;
    };
    let Some(next) = Local.timestamp_millis_opt(next_ms).single() else {
        return false;
    };

    match schedule.kind {
        ScheduleKind::Never => false,
        ScheduleKind::Once => next <= now,
        ScheduleKind::Daily => next <= now && now.time() >= next.time(),
        ScheduleKind::Weekly => {
            next <= now && now.weekday() == next.weekday() && now.time() >= next.time()
        }
    }
}

/// Advance a task's schedule after a run. Once deactivates the task and
/// leaves the stored date untouched; Daily and Weekly step forward in
/// whole days preserving the time-of-day, landing strictly after `now`.
pub fn advance_schedule(task: &mut Task, now: DateTime<Local>) {
    match task.schedule.kind {
        ScheduleKind::Never => {}
        ScheduleKind::Once => {
            task.active = false;
            task.schedule.kind = ScheduleKind::Never;
        }
        ScheduleKind::Daily => advance_by_days(&mut task.schedule, now, 1),
        ScheduleKind::Weekly => advance_by_days(&mut task.schedule, now, 7),
    }
}

fn advance_by_days(schedule: &mut Schedule, now: DateTime<Local>, step: u64) {
    let Some(next_ms) = schedule.next_run_time else {
        return;
    };
    let Some(mut next) = Local.timestamp_millis_opt(next_ms).single() else {
        return;
    };
    // Calendar-day steps, so the scheduled time-of-day survives a DST
    // transition.
    while next <= now {
        match next.checked_add_days(Days::new(step)) {
            Some(stepped) => next = stepped,
            None => return,
        }
    }
    schedule.next_run_time = Some(next.timestamp_millis());
}
