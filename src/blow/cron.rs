//! Cron engine behind the scheduled blow tasks.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use ::cron::Schedule;
use futures::future::BoxFuture;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Work run on every tick of a schedule.
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// The minimal surface the blow registry needs from a cron engine.
pub trait Scheduler: Send {
    /// Registers `job` under `expression`. Jobs added while running start right away.
    fn schedule(&mut self, expression: &str, job: Job) -> Result<()>;

    fn start(&mut self);

    /// Cancels every pending tick. Runs already in progress are left to finish.
    fn stop(&mut self);
}

/// Seconds-resolution scheduler: one tokio task per job sleeps until the
/// next matching instant and spawns the job there.
///
/// Expressions have six or seven fields, seconds first: `"*/5 * * * * *"`.
pub struct CronScheduler {
    jobs: Vec<(Schedule, Job)>,
    cancel: CancellationToken,
    running: bool,
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CronScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            cancel: CancellationToken::new(),
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn spawn_job(&self, schedule: Schedule, job: Job) {
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let mut last = Utc::now();
            loop {
                // an early wake-up must not fire the same slot twice
                let from = last.max(Utc::now());
                let Some(next) = schedule.after(&from).next() else {
                    break;
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(until(next)) => {}
                }
                last = next;
                tokio::spawn(job());
            }
        });
    }
}

impl Scheduler for CronScheduler {
    fn schedule(&mut self, expression: &str, job: Job) -> Result<()> {
        let schedule = Schedule::from_str(expression).map_err(|e| Error::InvalidSchedule {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        if self.running {
            self.spawn_job(schedule.clone(), Arc::clone(&job));
        }
        self.jobs.push((schedule, job));
        Ok(())
    }

    fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        for (schedule, job) in &self.jobs {
            self.spawn_job(schedule.clone(), Arc::clone(job));
        }
        tracing::debug!(jobs = self.jobs.len(), "cron scheduler started");
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        tracing::debug!("cron scheduler stopped");
    }
}

fn until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
