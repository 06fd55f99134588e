//! Daily cadence and the background loop that fires sync runs.
//!
//! Each run is spawned on its own task so the loop keeps answering commands
//! while it is in flight; overlapping triggers are turned away by the
//! engine's run lock and logged as skipped.

use crate::error::AppError;
use crate::models::RunTrigger;
use crate::services::sync_engine::SyncEngine;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Fires once a day at a fixed wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyCadence {
    at: NaiveTime,
}

impl Default for DailyCadence {
    /// Midnight.
    fn default() -> Self {
        Self { at: NaiveTime::MIN }
    }
}

impl DailyCadence {
    pub fn new(at: NaiveTime) -> Self {
        Self { at }
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// First firing instant strictly after `now`, in `now`'s time zone.
    ///
    /// A firing time that falls into a DST gap moves to the first valid
    /// instant after it.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();
        let today = now.date_naive();

        for offset in 0..=2 {
            let naive = (today + ChronoDuration::days(offset)).and_time(self.at);
            let candidate = tz
                .from_local_datetime(&naive)
                .earliest()
                .or_else(|| tz.from_local_datetime(&(naive + ChronoDuration::hours(1))).earliest());
            if let Some(candidate) = candidate {
                if candidate > *now {
                    return candidate;
                }
            }
        }

        now.clone() + ChronoDuration::days(1)
    }

    /// Time to wait from `now` until the next firing.
    pub fn until_next<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        (self.next_after(now) - now.clone())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    pub cadence: DailyCadence,

    /// Run once as soon as the scheduler starts.
    pub run_on_startup: bool,
}

/// Commands that can be sent to the scheduler loop.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Start a manual run now.
    TriggerSync,

    /// Stop scheduling; an in-flight run is allowed to finish.
    Stop,
}

/// Lightweight handle for controlling the scheduler loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Request a manual run.
    pub async fn trigger_sync(&self) -> Result<(), AppError> {
        self.command_tx
            .send(SchedulerCommand::TriggerSync)
            .await
            .map_err(|_| AppError::internal("Scheduler not running"))
    }

    pub async fn stop(&self) -> Result<(), AppError> {
        self.command_tx
            .send(SchedulerCommand::Stop)
            .await
            .map_err(|_| AppError::internal("Scheduler not running"))
    }
}

/// Run once and log how it went.
async fn run_and_log(engine: Arc<SyncEngine>, trigger: RunTrigger) {
    match engine.run_sync(trigger).await {
        Ok(summary) => log::debug!(
            "[scheduler] {} run {} finished: {}",
            trigger,
            summary.run_id,
            summary.outcome
        ),
        Err(AppError::RunInProgress) => {
            log::warn!("[scheduler] {} trigger skipped: a run is already in progress", trigger)
        }
        Err(e) => log::error!("[scheduler] {} run could not start: {}", trigger, e),
    }
}

/// Start the scheduler loop.
///
/// The loop ends on `Stop` or when the engine's shutdown token is cancelled;
/// either way it waits for the in-flight run before the returned task
/// completes.
pub fn start_background(
    engine: Arc<SyncEngine>,
    config: SchedulerConfig,
) -> (SchedulerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<SchedulerCommand>(16);

    let task = tokio::spawn(async move {
        let shutdown = engine.shutdown_token();
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        if config.run_on_startup {
            log::info!("[scheduler] Running startup sync");
            in_flight.push(tokio::spawn(run_and_log(engine.clone(), RunTrigger::Startup)));
        }

        loop {
            in_flight.retain(|run| !run.is_finished());

            let now = Local::now();
            let wait = config.cadence.until_next(&now);
            log::info!(
                "[scheduler] Next run at {}",
                config.cadence.next_after(&now).format("%Y-%m-%d %H:%M %Z")
            );

            tokio::select! {
                _ = shutdown.cancelled() => {
                    log::info!("[scheduler] Shutdown requested");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    in_flight.push(tokio::spawn(run_and_log(engine.clone(), RunTrigger::Cadence)));
                }
                cmd = rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::TriggerSync) => {
                            log::info!("[scheduler] Manual sync triggered");
                            in_flight.push(tokio::spawn(run_and_log(engine.clone(), RunTrigger::Manual)));
                        }
                        Some(SchedulerCommand::Stop) | None => {
                            log::info!("[scheduler] Scheduler stopping");
                            break;
                        }
                    }
                }
            }
        }

        for run in in_flight {
            if let Err(e) = run.await {
                log::error!("[scheduler] Sync task panicked: {}", e);
            }
        }
        log::info!("[scheduler] Scheduler stopped");
    });

    (SchedulerHandle { command_tx: tx }, task)
}
