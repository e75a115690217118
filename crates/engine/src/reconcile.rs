//! Reconciliation orchestrator: discovery, then a deadline-bounded sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use metrics::{counter, histogram};
use reaper_core::prelude::*;
use reaper_core::{duration, enumerate};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{pause, DeleteError, DeleteOutcome, Executor, ListError, Lister, SweepConfig};

fn human(d: &Duration) -> String { duration::format_rounded(*d) }

/// Pass-level failures. Per-instance and per-kind errors never end up here.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("discovery failed: {0}")]
    Discovery(#[source] ClusterError),
    #[error("execution timed out after {}", human(.0))]
    TimedOut(Duration),
    #[error("sweep task aborted: {0}")]
    Aborted(String),
}

impl PassError {
    pub fn is_timeout(&self) -> bool { matches!(self, PassError::TimedOut(_)) }
}

/// Counters for a completed pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PassReport {
    /// Resource kinds visited.
    pub kinds: usize,
    /// Kinds given up on after exhausting list retries.
    pub abandoned_kinds: usize,
    pub seen: usize,
    pub annotated: usize,
    pub malformed: usize,
    pub expired: usize,
    pub deleted: usize,
    /// Expired instances that were already gone when the delete was issued.
    pub already_gone: usize,
    pub delete_failures: usize,
}

/// Stateless across passes: every call rediscovers the API surface.
#[derive(Clone)]
pub struct Reconciler {
    client: Arc<dyn ClusterClient>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: Arc<SweepConfig>,
}

impl Reconciler {
    pub fn new(client: Arc<dyn ClusterClient>, notifier: Arc<dyn Notifier>, config: SweepConfig) -> Self {
        Self { client, notifier, clock: Arc::new(SystemClock), config: Arc::new(config) }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SweepConfig { &self.config }

    /// Run one pass.
    ///
    /// The sweep races `execution_timeout`. On timeout the sweep is cancelled and
    /// `PassError::TimedOut` is returned; deletions already issued stay done.
    pub async fn reconcile(&self) -> Result<PassReport, PassError> {
        let started = Instant::now();
        let outcome = self.run().await;
        histogram!("reaper_pass_ms", started.elapsed().as_secs_f64() * 1000.0);
        let label = match &outcome {
            Ok(_) => "success",
            Err(PassError::TimedOut(_)) => "timeout",
            Err(_) => "error",
        };
        counter!("reaper_passes_total", 1u64, "outcome" => label);
        outcome
    }

    async fn run(&self) -> Result<PassReport, PassError> {
        let snapshot = self.client.discover().await.map_err(PassError::Discovery)?;
        let targets = enumerate(&snapshot, &self.config.allowlist);
        info!(groups = snapshot.groups.len(), targets = targets.len(), "discovered resource kinds");

        let cancel = CancellationToken::new();
        // Also stops the sweep when this future is dropped mid-pass (e.g. on shutdown).
        let _cancel_on_drop = cancel.clone().drop_guard();
        let token = cancel.clone();
        let sweeper = self.clone();
        let mut sweep = tokio::spawn(async move { sweeper.sweep(&targets, &token).await });

        tokio::select! {
            joined = &mut sweep => joined.map_err(|e| PassError::Aborted(e.to_string())),
            _ = tokio::time::sleep(self.config.execution_timeout) => {
                cancel.cancel();
                Err(PassError::TimedOut(self.config.execution_timeout))
            }
        }
    }

    async fn sweep(&self, targets: &[Target], cancel: &CancellationToken) -> PassReport {
        let lister = Lister::new(self.client.as_ref(), &self.config, cancel);
        let executor = Executor::new(self.client.as_ref(), self.notifier.as_ref(), &self.config, cancel);
        let mut report = PassReport::default();

        for target in targets {
            if cancel.is_cancelled() {
                break;
            }
            report.kinds += 1;
            let items = lister.list(target);
            futures::pin_mut!(items);
            while let Some(next) = items.next().await {
                match next {
                    Ok(instance) => self.process(&executor, target, &instance, &mut report).await,
                    Err(ListError::Cancelled) => return report,
                    Err(e) => {
                        warn!(resource = %target.gvr, error = %e, "abandoning resource kind for this pass");
                        counter!("reaper_abandoned_kinds_total", 1u64, "resource" => target.gvr.resource.clone());
                        report.abandoned_kinds += 1;
                        break;
                    }
                }
            }
            if !pause(cancel, self.config.throttle).await {
                break;
            }
        }
        report
    }

    async fn process(&self, executor: &Executor<'_>, target: &Target, instance: &ResourceInstance, report: &mut PassReport) {
        report.seen += 1;
        let resource = target.gvr.resource.as_str();
        match self.config.policy.evaluate(instance, self.clock.now()) {
            Expiry::NotAnnotated => {}
            Expiry::Malformed(reason) => {
                report.annotated += 1;
                report.malformed += 1;
                counter!("reaper_malformed_total", 1u64, "resource" => resource.to_string());
                warn!(resource, namespace = ?instance.namespace, name = %instance.name, reason = %reason, "ignoring malformed ttl");
            }
            Expiry::NotExpired { ttl, remaining } => {
                report.annotated += 1;
                info!(resource, namespace = ?instance.namespace, name = %instance.name, ttl = %duration::format(ttl), expires_in = %human(&remaining), "not expired");
            }
            Expiry::Expired { ttl, overshoot } => {
                report.annotated += 1;
                report.expired += 1;
                info!(resource, namespace = ?instance.namespace, name = %instance.name, ttl = %duration::format(ttl), expired_ago = %human(&overshoot), "expired");
                match executor.delete(target, instance, ttl).await {
                    Ok(DeleteOutcome::Deleted) => report.deleted += 1,
                    Ok(DeleteOutcome::AlreadyGone) => report.already_gone += 1,
                    Err(DeleteError::Failed { .. }) => report.delete_failures += 1,
                    Err(DeleteError::Cancelled) => {}
                }
            }
        }
    }
}
