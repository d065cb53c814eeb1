//! Periodic execution of workflows with schedule triggers.
//!
//! Jobs are grouped by a source key (typically the configuration file they came
//! from) so a reload can swap one source's jobs without touching the others.

use super::runtime::{RunOptions, Runtime};
use super::trigger::Trigger;
use super::types::{ScheduleTrigger, Workflow};
use crate::error::Error;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum Cadence {
    Every(Duration),
    Cron(croner::Cron),
}

impl Cadence {
    fn from_trigger(trigger: &ScheduleTrigger) -> anyhow::Result<Self> {
        match (trigger.interval()?, trigger.cron()?) {
            (Some(every), None) => Ok(Cadence::Every(every)),
            (None, Some(cron)) => Ok(Cadence::Cron(cron)),
            _ => anyhow::bail!("Schedule trigger must declare exactly one of 'every' or 'cron'"),
        }
    }

    fn next_delay(&self) -> Option<Duration> {
        match self {
            Cadence::Every(every) => Some(*every),
            Cadence::Cron(cron) => {
                let now = Utc::now();
                let next = cron.find_next_occurrence(&now, false).ok()?;
                (next - now).to_std().ok()
            }
        }
    }
}

struct Job {
    workflow: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the background tasks of schedule-triggered workflows.
pub struct Scheduler {
    runtime: Arc<Runtime>,
    root: CancellationToken,
    jobs: Mutex<HashMap<String, Vec<Job>>>,
}

impl Scheduler {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Scheduler {
            runtime,
            root: CancellationToken::new(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Replace every job registered under `key` with the schedule triggers of
    /// `workflows`. Nothing changes if any trigger is invalid. Must be called
    /// from within a Tokio runtime.
    pub fn replace(&self, key: &str, workflows: &[Workflow]) -> anyhow::Result<usize> {
        let mut planned = Vec::new();
        for workflow in workflows {
            for trigger in &workflow.on.schedule {
                let cadence = Cadence::from_trigger(trigger)?;
                planned.push((workflow.clone(), trigger.clone(), cadence));
            }
        }

        let jobs: Vec<Job> = planned
            .into_iter()
            .map(|(workflow, trigger, cadence)| self.spawn(workflow, trigger, cadence))
            .collect();
        let count = jobs.len();

        let previous = self.jobs.lock().insert(key.to_string(), jobs);
        if let Some(previous) = previous {
            debug!("Cancelling {} previous jobs for '{}'", previous.len(), key);
            for job in previous {
                job.cancel.cancel();
            }
        }
        info!("Registered {} scheduled jobs for '{}'", count, key);
        Ok(count)
    }

    /// Cancel and forget the jobs registered under `key`.
    pub fn remove(&self, key: &str) -> usize {
        let removed = self.jobs.lock().remove(key).unwrap_or_default();
        for job in &removed {
            job.cancel.cancel();
        }
        removed.len()
    }

    /// `(key, workflow)` of every job that is still running.
    pub fn jobs(&self) -> Vec<(String, String)> {
        let jobs = self.jobs.lock();
        let mut active: Vec<(String, String)> = jobs
            .iter()
            .flat_map(|(key, list)| {
                list.iter()
                    .filter(|job| !job.handle.is_finished())
                    .map(move |job| (key.clone(), job.workflow.clone()))
            })
            .collect();
        active.sort();
        active
    }

    /// Cancel every job and wait for the tasks to end.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let jobs: Vec<Job> = self.jobs.lock().drain().flat_map(|(_, list)| list).collect();
        for job in jobs {
            if let Err(e) = job.handle.await {
                warn!("Scheduled job for '{}' ended abnormally: {}", job.workflow, e);
            }
        }
        info!("Scheduler stopped");
    }

    fn spawn(&self, workflow: Workflow, trigger: ScheduleTrigger, cadence: Cadence) -> Job {
        let cancel = self.root.child_token();
        let name = workflow.name.clone();
        let handle = tokio::spawn(drive(
            self.runtime.clone(),
            workflow,
            trigger,
            cadence,
            cancel.clone(),
        ));
        Job {
            workflow: name,
            cancel,
            handle,
        }
    }
}

async fn drive(
    runtime: Arc<Runtime>,
    workflow: Workflow,
    trigger: ScheduleTrigger,
    cadence: Cadence,
    cancel: CancellationToken,
) {
    let workflows = std::slice::from_ref(&workflow);
    let mut runs: u64 = 0;
    let mut immediate = trigger.run_first_time_immediately;

    loop {
        if trigger.iterations > 0 && runs >= trigger.iterations {
            debug!("Workflow '{}' reached {} scheduled iterations", workflow.name, runs);
            break;
        }
        let wait = if immediate {
            Duration::ZERO
        } else {
            match cadence.next_delay() {
                Some(wait) => wait,
                None => {
                    warn!("Schedule of workflow '{}' has no next occurrence", workflow.name);
                    break;
                }
            }
        };
        immediate = false;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        runs += 1;
        let options = RunOptions::default().with_cancel(cancel.clone());
        match runtime
            .run(workflows, |t| matches!(t, Trigger::Schedule(_)), options)
            .await
        {
            Ok(summary) => debug!(
                "Scheduled run {} of '{}' finished (success: {})",
                runs,
                workflow.name,
                summary.is_success()
            ),
            Err(Error::Cancelled) => break,
            Err(e) => warn!("Scheduled run of '{}' failed: {}", workflow.name, e),
        }
    }
}
