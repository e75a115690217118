//! TTL expiry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{duration, ResourceInstance};

pub const DEFAULT_TTL_ANNOTATION: &str = "reaper.dev/ttl";
pub const DEFAULT_REFRESH_ANNOTATION: &str = "reaper.dev/refreshed-at";

/// Outcome of evaluating one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry {
    NotAnnotated,
    Malformed(String),
    Expired { ttl: Duration, overshoot: Duration },
    NotExpired { ttl: Duration, remaining: Duration },
}

impl Expiry {
    pub fn is_expired(&self) -> bool { matches!(self, Expiry::Expired { .. }) }
}

/// Which annotations carry the TTL and the refresh timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub ttl_annotation: String,
    pub refresh_annotation: String,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            ttl_annotation: DEFAULT_TTL_ANNOTATION.to_string(),
            refresh_annotation: DEFAULT_REFRESH_ANNOTATION.to_string(),
        }
    }
}

impl ExpiryPolicy {
    /// Refresh annotation when it parses as RFC3339, creation timestamp otherwise.
    pub fn anchor(&self, instance: &ResourceInstance) -> Option<DateTime<Utc>> {
        if let Some(raw) = instance.annotation(&self.refresh_annotation) {
            match DateTime::parse_from_rfc3339(raw.trim()) {
                Ok(ts) => return Some(ts.with_timezone(&Utc)),
                Err(e) => warn!(
                    kind = %instance.kind,
                    namespace = ?instance.namespace,
                    name = %instance.name,
                    value = %raw,
                    error = %e,
                    "unparseable refresh timestamp; falling back to creation timestamp"
                ),
            }
        }
        instance.creation_timestamp
    }

    /// Decide whether `instance` has outlived its TTL at `now`.
    /// Expired only when `now` is strictly after `anchor + ttl`.
    pub fn evaluate(&self, instance: &ResourceInstance, now: DateTime<Utc>) -> Expiry {
        let Some(raw) = instance.annotation(&self.ttl_annotation) else {
            return Expiry::NotAnnotated;
        };
        let ttl = match duration::parse(raw) {
            Ok(ttl) => ttl,
            Err(e) => return Expiry::Malformed(format!("invalid ttl {:?}: {}", raw, e)),
        };
        let Some(anchor) = self.anchor(instance) else {
            return Expiry::Malformed("missing creation timestamp".to_string());
        };
        let deadline = chrono::Duration::from_std(ttl).ok().and_then(|d| anchor.checked_add_signed(d));
        let Some(deadline) = deadline else {
            // Beyond the representable range: never expires.
            return Expiry::NotExpired { ttl, remaining: Duration::MAX };
        };
        if now > deadline {
            let overshoot = (now - deadline).to_std().unwrap_or_default();
            Expiry::Expired { ttl, overshoot }
        } else {
            let remaining = (deadline - now).to_std().unwrap_or_default();
            Expiry::NotExpired { ttl, remaining }
        }
    }
}
