use std::time::Duration;

use reaper_core::ExpiryPolicy;

pub const DEFAULT_PAGE_SIZE: u32 = 500;
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(20 * 60);
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(50);
pub const DEFAULT_LIST_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_RETRY_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Knobs for one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepConfig {
    pub policy: ExpiryPolicy,
    /// Maximum items per list call.
    pub page_size: u32,
    /// Server-side timeout for each list call.
    pub list_timeout: Duration,
    /// Wall-clock budget for a pass, discovery excluded.
    pub execution_timeout: Duration,
    /// Pause after every page, every resource kind and every deletion attempt.
    pub throttle: Duration,
    /// Retries per page after the first failed list call.
    pub list_retries: u32,
    pub retry_backoff: Duration,
    pub retry_backoff_max: Duration,
    /// Plural resource names to reconcile; empty means all.
    pub allowlist: Vec<String>,
    /// Retry a failed delete once with a zero grace period.
    pub force_delete_retry: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            policy: ExpiryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            list_timeout: DEFAULT_LIST_TIMEOUT,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            throttle: DEFAULT_THROTTLE,
            list_retries: DEFAULT_LIST_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            retry_backoff_max: DEFAULT_RETRY_BACKOFF_MAX,
            allowlist: Vec::new(),
            force_delete_retry: false,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("page size must be greater than zero")]
    ZeroPageSize,
    #[error("execution timeout must be greater than zero")]
    ZeroExecutionTimeout,
    #[error("list timeout must be at least one second")]
    ListTimeoutTooShort,
    #[error("{0} annotation key must not be empty")]
    EmptyAnnotation(&'static str),
    #[error("retry backoff ({base:?}) exceeds its maximum ({max:?})")]
    BackoffAboveMax { base: Duration, max: Duration },
}

impl SweepConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.execution_timeout.is_zero() {
            return Err(ConfigError::ZeroExecutionTimeout);
        }
        if self.list_timeout < Duration::from_secs(1) {
            return Err(ConfigError::ListTimeoutTooShort);
        }
        if self.policy.ttl_annotation.trim().is_empty() {
            return Err(ConfigError::EmptyAnnotation("ttl"));
        }
        if self.policy.refresh_annotation.trim().is_empty() {
            return Err(ConfigError::EmptyAnnotation("refresh"));
        }
        if self.retry_backoff > self.retry_backoff_max {
            return Err(ConfigError::BackoffAboveMax { base: self.retry_backoff, max: self.retry_backoff_max });
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based): doubles from `retry_backoff`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.retry_backoff.checked_mul(factor).unwrap_or(self.retry_backoff_max).min(self.retry_backoff_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(SweepConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_values() {
        let cfg = SweepConfig { page_size: 0, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroPageSize));
        let cfg = SweepConfig { execution_timeout: Duration::ZERO, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroExecutionTimeout));
        let mut cfg = SweepConfig::default();
        cfg.policy.ttl_annotation = " ".into();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyAnnotation("ttl")));
        let cfg = SweepConfig { retry_backoff: Duration::from_secs(60), ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::BackoffAboveMax { .. })));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = SweepConfig::default();
        assert_eq!(cfg.backoff(1), Duration::from_millis(500));
        assert_eq!(cfg.backoff(2), Duration::from_secs(1));
        assert_eq!(cfg.backoff(4), Duration::from_secs(4));
        assert_eq!(cfg.backoff(7), Duration::from_secs(30));
        assert_eq!(cfg.backoff(40), Duration::from_secs(30));
    }
}
