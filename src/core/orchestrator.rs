// src/core/orchestrator.rs

//! Runs every probe for one target concurrently.
//!
//! Probes are admitted through a semaphore, each under its own budget capped
//! by the scan deadline. A probe that overruns is recorded as `TimedOut`; one
//! that panics is recorded as `Failed`. Every configured probe kind appears in
//! the output exactly once, whatever happened to its task.

use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::error::ProbeError;
use crate::core::models::{ProbeKind, ProbeResult, ProbeStatus};
use crate::core::retry::RetryPolicy;
use crate::core::scanner::{Probe, ProbeContext};
use crate::core::target::Target;

pub struct Orchestrator {
    probes: Vec<Arc<dyn Probe>>,
    concurrency: usize,
    deadline: Duration,
    /// Extra time after the deadline before unfinished tasks are aborted.
    grace: Duration,
    retry: RetryPolicy,
    timeouts: BTreeMap<ProbeKind, Duration>,
}

impl Orchestrator {
    pub fn new(probes: Vec<Arc<dyn Probe>>, config: &Config) -> Self {
        let timeouts = ProbeKind::all()
            .map(|kind| (kind, config.timeout_for(kind)))
            .collect();
        Self {
            probes,
            concurrency: config.orchestrator.concurrency.max(1),
            deadline: config.deadline(),
            grace: config.grace(),
            retry: config.probes.retry.clone(),
            timeouts,
        }
    }

    pub fn probe_kinds(&self) -> Vec<ProbeKind> {
        self.probes.iter().map(|p| p.kind()).collect()
    }

    /// Runs all probes and returns one result per probe kind.
    pub async fn run(&self, target: &Target) -> BTreeMap<ProbeKind, ProbeResult> {
        let started = Instant::now();
        let deadline = started + self.deadline;
        let hard_stop = deadline + self.grace;
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        info!(
            target = %target,
            probes = self.probes.len(),
            concurrency = self.concurrency,
            deadline_ms = self.deadline.as_millis() as u64,
            "Scan started."
        );

        for probe in &self.probes {
            let probe = probe.clone();
            let kind = probe.kind();
            let semaphore = semaphore.clone();
            let target = target.clone();
            let retry = self.retry.clone();
            let budget = self.timeouts.get(&kind).copied().unwrap_or(self.deadline);
            debug!(probe = %kind, "Probe queued.");

            tasks.spawn(async move {
                let queued = Instant::now();
                let _permit = match timeout_at(deadline, semaphore.acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        return (
                            kind,
                            ProbeResult::failed(
                                kind,
                                ProbeError::Crashed("scheduler closed".into()),
                                queued.elapsed(),
                            ),
                        );
                    }
                    Err(_) => {
                        debug!(probe = %kind, "Deadline passed while waiting for a slot.");
                        return (kind, ProbeResult::timed_out(kind, queued.elapsed(), Duration::ZERO));
                    }
                };

                let budget = budget.min(deadline.saturating_duration_since(Instant::now()));
                let ctx = ProbeContext::new(deadline, budget, retry);
                debug!(probe = %kind, budget_ms = budget.as_millis() as u64, "Probe running.");

                let start = Instant::now();
                let run = AssertUnwindSafe(probe.run(&target, &ctx)).catch_unwind();
                let result = match timeout(budget, run).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(panic)) => {
                        let message = panic_message(panic.as_ref());
                        error!(probe = %kind, panic = %message, "Probe panicked!");
                        ProbeResult::failed(kind, ProbeError::Crashed(message), start.elapsed())
                    }
                    Err(_) => ProbeResult::timed_out(kind, start.elapsed(), budget),
                };
                (kind, result)
            });
        }

        let mut results = BTreeMap::new();
        let mut aborted = false;
        loop {
            match timeout_at(hard_stop, tasks.join_next()).await {
                Ok(Some(Ok((kind, result)))) => {
                    log_outcome(&result);
                    results.insert(kind, result);
                }
                Ok(Some(Err(e))) => error!(error = %e, "Probe task did not complete."),
                Ok(None) => break,
                Err(_) => {
                    warn!(pending = tasks.len(), "Hard stop reached, aborting remaining probes.");
                    tasks.abort_all();
                    aborted = true;
                    break;
                }
            }
        }

        for kind in self.probe_kinds() {
            results.entry(kind).or_insert_with(|| {
                let elapsed = started.elapsed();
                if aborted {
                    ProbeResult::timed_out(kind, elapsed, self.deadline)
                } else {
                    ProbeResult::failed(kind, ProbeError::Crashed("probe task was lost".into()), elapsed)
                }
            });
        }

        info!(
            target = %target,
            elapsed_ms = started.elapsed().as_millis() as u64,
            succeeded = results.values().filter(|r| r.status() == ProbeStatus::Success).count(),
            "Scan finished."
        );
        results
    }
}

fn log_outcome(result: &ProbeResult) {
    match result.status() {
        ProbeStatus::Success | ProbeStatus::PartialData => debug!(
            probe = %result.kind(),
            status = %result.status(),
            latency_ms = result.latency_ms(),
            "Probe completed."
        ),
        ProbeStatus::TimedOut => warn!(
            probe = %result.kind(),
            latency_ms = result.latency_ms(),
            "Probe timed out."
        ),
        ProbeStatus::Failed => warn!(
            probe = %result.kind(),
            error = ?result.error(),
            "Probe failed."
        ),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
