//! Deletion of expired instances, with event notification.

use std::time::Duration;

use metrics::counter;
use reaper_core::{duration, ClusterClient, ClusterError, Notification, Notifier, ResourceInstance, Target};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{or_cancelled, pause, SweepConfig};

pub const REASON_DELETED: &str = "ExpiredResourceDeleted";
pub const REASON_DELETE_FAILED: &str = "ExpiredResourceDeleteFailed";

#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error("deletion cancelled")]
    Cancelled,
    #[error("failed to delete {name}: {source}")]
    Failed {
        name: String,
        #[source]
        source: ClusterError,
    },
}

/// How a delete request ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The server no longer had the object.
    AlreadyGone,
}

#[derive(Clone, Copy)]
pub struct Executor<'a> {
    client: &'a dyn ClusterClient,
    notifier: &'a dyn Notifier,
    config: &'a SweepConfig,
    cancel: &'a CancellationToken,
}

impl<'a> Executor<'a> {
    pub fn new(
        client: &'a dyn ClusterClient,
        notifier: &'a dyn Notifier,
        config: &'a SweepConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self { client, notifier, config, cancel }
    }

    /// Delete one expired instance and report it through an event.
    ///
    /// Failures are not retried here (beyond the optional zero-grace attempt); the
    /// next pass sees the same instance again. Every attempt is followed by the
    /// throttle pause.
    pub async fn delete(
        &self,
        target: &Target,
        instance: &ResourceInstance,
        ttl: Duration,
    ) -> Result<DeleteOutcome, DeleteError> {
        let result = self.issue(target, instance).await;
        match &result {
            Ok(DeleteOutcome::Deleted) => {
                info!(resource = %target.gvr.resource, namespace = ?instance.namespace, name = %instance.name, "deleted");
                counter!("reaper_deleted_total", 1u64, "resource" => target.gvr.resource.clone());
                let message = format!("Deleted resource because {} or more has elapsed", duration::format(ttl));
                self.notify(target, instance, REASON_DELETED, message, false).await;
            }
            Ok(DeleteOutcome::AlreadyGone) => {
                debug!(resource = %target.gvr.resource, namespace = ?instance.namespace, name = %instance.name, "already gone");
            }
            Err(DeleteError::Failed { source, .. }) => {
                warn!(resource = %target.gvr.resource, namespace = ?instance.namespace, name = %instance.name, error = %source, "failed to delete");
                counter!("reaper_delete_failures_total", 1u64, "resource" => target.gvr.resource.clone());
                let message = format!("Unable to delete expired resource: {}", source);
                self.notify(target, instance, REASON_DELETE_FAILED, message, true).await;
            }
            Err(DeleteError::Cancelled) => return Err(DeleteError::Cancelled),
        }
        pause(self.cancel, self.config.throttle).await;
        result
    }

    async fn issue(&self, target: &Target, instance: &ResourceInstance) -> Result<DeleteOutcome, DeleteError> {
        match self.call(target, instance, None).await? {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(ClusterError::NotFound(_)) => Ok(DeleteOutcome::AlreadyGone),
            Err(e) if self.config.force_delete_retry => {
                warn!(resource = %target.gvr.resource, name = %instance.name, error = %e, "delete failed; retrying with zero grace period");
                match self.call(target, instance, Some(0)).await? {
                    Ok(()) => Ok(DeleteOutcome::Deleted),
                    Err(ClusterError::NotFound(_)) => Ok(DeleteOutcome::AlreadyGone),
                    Err(source) => Err(DeleteError::Failed { name: instance.name.clone(), source }),
                }
            }
            Err(source) => Err(DeleteError::Failed { name: instance.name.clone(), source }),
        }
    }

    async fn call(
        &self,
        target: &Target,
        instance: &ResourceInstance,
        grace_period_seconds: Option<u32>,
    ) -> Result<Result<(), ClusterError>, DeleteError> {
        let request = self.client.delete(&target.gvr, instance.namespace.as_deref(), &instance.name, grace_period_seconds);
        or_cancelled(self.cancel, request).await.ok_or(DeleteError::Cancelled)
    }

    /// Notification failures are logged only.
    async fn notify(&self, target: &Target, instance: &ResourceInstance, reason: &str, message: String, warning: bool) {
        let notification = Notification {
            api_version: target.gvr.api_version(),
            namespace: instance.namespace.clone(),
            kind: instance.kind.clone(),
            name: instance.name.clone(),
            reason: reason.to_string(),
            message,
            warning,
        };
        match or_cancelled(self.cancel, self.notifier.notify(notification)).await {
            Some(Err(e)) => warn!(name = %instance.name, reason, error = %e, "failed to emit event"),
            Some(Ok(())) | None => {}
        }
    }
}
