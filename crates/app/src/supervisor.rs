//! Fixed-interval pass loop with a consecutive-failure budget.

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use reaper_core::duration;
use reaper_engine::{PassError, PassReport};
use tracing::{error, info};

/// Consecutive failed passes; reset by any success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureBudget {
    max: u32,
    consecutive: u32,
}

impl FailureBudget {
    pub fn new(max: u32) -> Self { Self { max, consecutive: 0 } }

    pub fn consecutive(&self) -> u32 { self.consecutive }

    /// Count one failure and return the new streak length.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive
    }

    /// Reset the streak; returns its length if there was one.
    pub fn record_success(&mut self) -> Option<u32> {
        let previous = std::mem::take(&mut self.consecutive);
        (previous > 0).then_some(previous)
    }

    /// More than `max` failures in a row.
    pub fn exhausted(&self) -> bool { self.consecutive > self.max }
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub interval: Duration,
    pub max_failures: u32,
    /// Run a single pass and return its outcome.
    pub once: bool,
}

/// Drive `pass` until `shutdown` resolves or the failure budget runs out.
pub async fn supervise<P, Fut, S>(mut pass: P, settings: LoopSettings, shutdown: S) -> Result<()>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<PassReport, PassError>>,
    S: Future<Output = ()>,
{
    let mut budget = FailureBudget::new(settings.max_failures);
    tokio::pin!(shutdown);

    loop {
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("shutdown requested; abandoning pass");
                return Ok(());
            }
            outcome = pass() => outcome,
        };
        let took_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(report) => {
                if let Some(failures) = budget.record_success() {
                    info!(failures, "pass succeeded after failed attempts; resetting counter");
                }
                info!(
                    took_ms,
                    kinds = report.kinds,
                    seen = report.seen,
                    expired = report.expired,
                    deleted = report.deleted,
                    already_gone = report.already_gone,
                    delete_failures = report.delete_failures,
                    abandoned_kinds = report.abandoned_kinds,
                    "pass complete"
                );
                if settings.once {
                    return Ok(());
                }
            }
            Err(e) => {
                let failures = budget.record_failure();
                if e.is_timeout() {
                    error!(took_ms, failures, error = %e, "pass timed out");
                } else {
                    error!(took_ms, failures, error = %e, "pass failed");
                }
                if settings.once {
                    return Err(e.into());
                }
                if budget.exhausted() {
                    return Err(anyhow!("reconciliation failed {} times in a row; last error: {}", failures, e));
                }
            }
        }

        info!(took_ms, sleep = %duration::format(settings.interval), "sleeping until next pass");
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("shutdown requested");
                return Ok(());
            }
            _ = tokio::time::sleep(settings.interval) => {}
        }
    }
}
