//! Reaper engine: one reconciliation pass over every listable and deletable
//! resource kind, deleting instances whose TTL has elapsed.
//!
//! The pass is sequential (kinds, pages and instances one at a time) and races a
//! deadline. Losing the race cancels the sweep through a [`CancellationToken`]
//! observed by every list, delete and throttle pause.

#![forbid(unsafe_code)]

pub mod config;
pub mod executor;
pub mod lister;
pub mod reconcile;

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use config::{ConfigError, SweepConfig};
pub use executor::{DeleteError, DeleteOutcome, Executor, REASON_DELETED, REASON_DELETE_FAILED};
pub use lister::{ListError, Lister};
pub use reconcile::{PassError, PassReport, Reconciler};

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn or_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Sleep for `delay`; `false` if cancelled first.
pub(crate) async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    or_cancelled(cancel, tokio::time::sleep(delay)).await.is_some()
}
