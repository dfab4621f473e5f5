//! The daemon's task loop
//!
//! Runs inside the detached process on a single-threaded runtime. Tasks are
//! invoked one after another; the only suspension points are the sleeps
//! between tasks and between cycles, which is also where a stop request is
//! noticed.

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::task::TaskOutcome;
use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::sleep;

/// Outcomes of one pass over the task set
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    /// Task name and outcome, in task order
    pub outcomes: Vec<(String, TaskOutcome)>,
}

impl CycleReport {
    pub fn failures(&self) -> impl Iterator<Item = &(String, TaskOutcome)> {
        self.outcomes.iter().filter(|(_, outcome)| !outcome.is_success())
    }
}

pub struct TaskLoop<'a> {
    config: &'a ServiceConfig,
}

impl<'a> TaskLoop<'a> {
    pub fn new(config: &'a ServiceConfig) -> Self {
        Self { config }
    }

    /// Run until SIGTERM or SIGINT arrives. Returns the number of completed
    /// cycles.
    pub async fn run(&self) -> Result<u64> {
        // handlers go in before the first sleep so a stop never hits the
        // default disposition
        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let shutdown = async move {
            tokio::select! {
                _ = terminate.recv() => tracing::debug!("received SIGTERM"),
                _ = interrupt.recv() => tracing::debug!("received SIGINT"),
            }
        };
        Ok(self.run_until(shutdown).await)
    }

    /// Run cycles until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut completed = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!(cycles = completed, "stopping task loop");
                    return completed;
                }
                report = self.next_cycle(completed + 1) => {
                    completed = report.cycle;
                    tracing::debug!(cycle = completed, failures = report.failures().count(), "cycle finished");
                }
            }
        }
    }

    async fn next_cycle(&self, cycle: u64) -> CycleReport {
        sleep(self.config.loop_sleep).await;
        self.run_cycle(cycle).await
    }

    /// Invoke every task once, in order
    pub async fn run_cycle(&self, cycle: u64) -> CycleReport {
        let started_at = Utc::now();
        let mut outcomes = Vec::with_capacity(self.config.tasks.len());

        for task in &self.config.tasks {
            // quiet mode keeps failures out of the redirected streams
            let outcome = if self.config.debug_mode {
                task.invoke()
            } else {
                task.invoke_silently()
            };
            match &outcome {
                TaskOutcome::Succeeded => {
                    tracing::trace!(cycle, task = task.name(), "task done");
                }
                failed => {
                    if self.config.debug_mode {
                        tracing::error!(cycle, task = task.name(), "task error: {}", failed);
                    }
                }
            }
            outcomes.push((task.name().to_string(), outcome));
            sleep(self.config.task_sleep).await;
        }

        CycleReport {
            cycle,
            started_at,
            outcomes,
        }
    }
}
