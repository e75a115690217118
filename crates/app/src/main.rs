use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use reaper_core::duration;
use reaper_core::expiry::{DEFAULT_REFRESH_ANNOTATION, DEFAULT_TTL_ANNOTATION};
use reaper_core::ExpiryPolicy;
use reaper_engine::{Reconciler, SweepConfig};
use reaper_kubehub::{KubeCluster, KubeEvents};
use tracing::{info, warn};

mod supervisor;

use supervisor::{supervise, LoopSettings};

#[derive(Parser, Debug)]
#[command(name = "reaper", version, about = "Delete Kubernetes resources whose TTL annotation has elapsed")]
struct Cli {
    /// Annotation holding the lifespan, e.g. "30m", "24h", "7d"
    #[arg(long, env = "REAPER_TTL_ANNOTATION", default_value = DEFAULT_TTL_ANNOTATION)]
    ttl_annotation: String,

    /// Annotation holding an RFC3339 timestamp that restarts the TTL
    #[arg(long, env = "REAPER_REFRESH_ANNOTATION", default_value = DEFAULT_REFRESH_ANNOTATION)]
    refresh_annotation: String,

    /// Maximum items per list request
    #[arg(long, env = "REAPER_PAGE_SIZE", default_value_t = 500)]
    page_size: u32,

    /// Server-side timeout of each list request
    #[arg(long, env = "REAPER_LIST_TIMEOUT", default_value = "60s", value_parser = duration::parse)]
    list_timeout: Duration,

    /// Budget for one pass (discovery excluded)
    #[arg(long, env = "REAPER_EXECUTION_TIMEOUT", default_value = "20m", value_parser = duration::parse)]
    execution_timeout: Duration,

    /// Pause between passes
    #[arg(long, env = "REAPER_INTERVAL", default_value = "5m", value_parser = duration::parse)]
    interval: Duration,

    /// Pause after every page, resource kind and deletion
    #[arg(long, env = "REAPER_THROTTLE", default_value = "50ms", value_parser = duration::parse)]
    throttle: Duration,

    /// Retries per page when a list request fails
    #[arg(long, env = "REAPER_LIST_RETRIES", default_value_t = 5)]
    list_retries: u32,

    #[arg(long, env = "REAPER_RETRY_BACKOFF", default_value = "500ms", value_parser = duration::parse)]
    retry_backoff: Duration,

    #[arg(long, env = "REAPER_RETRY_BACKOFF_MAX", default_value = "30s", value_parser = duration::parse)]
    retry_backoff_max: Duration,

    /// Consecutive failed passes tolerated before exiting
    #[arg(long, env = "REAPER_MAX_FAILURES", default_value_t = 10)]
    max_failures: u32,

    /// Only reconcile these plural resource names (comma separated)
    #[arg(long = "resources", env = "REAPER_RESOURCES", value_delimiter = ',')]
    resources: Vec<String>,

    /// Retry a failed delete once with a zero grace period
    #[arg(long, env = "REAPER_FORCE_DELETE_RETRY", action = ArgAction::SetTrue)]
    force_delete_retry: bool,

    /// Run one pass and exit
    #[arg(long, env = "REAPER_ONCE", action = ArgAction::SetTrue)]
    once: bool,

    /// Source component recorded on emitted events
    #[arg(long, env = "REAPER_COMPONENT", default_value = "reaper")]
    component: String,
}

impl Cli {
    fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            policy: ExpiryPolicy {
                ttl_annotation: self.ttl_annotation.clone(),
                refresh_annotation: self.refresh_annotation.clone(),
            },
            page_size: self.page_size,
            list_timeout: self.list_timeout,
            execution_timeout: self.execution_timeout,
            throttle: self.throttle,
            list_retries: self.list_retries,
            retry_backoff: self.retry_backoff,
            retry_backoff_max: self.retry_backoff_max,
            allowlist: self.resources.iter().map(|r| r.trim().to_string()).filter(|r| !r.is_empty()).collect(),
            force_delete_retry: self.force_delete_retry,
        }
    }
}

fn init_tracing() {
    let env = std::env::var("REAPER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("REAPER_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid REAPER_METRICS_ADDR; expected host:port");
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM; Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let config = cli.sweep_config();
    config.validate().context("invalid configuration")?;

    let client = reaper_kubehub::connect().await?;
    let cluster = Arc::new(KubeCluster::new(client.clone()));
    let events = Arc::new(KubeEvents::new(client, cli.component.clone()));
    let reconciler = Reconciler::new(cluster, events, config);

    info!(
        ttl_annotation = %cli.ttl_annotation,
        execution_timeout = %duration::format(cli.execution_timeout),
        interval = %duration::format(cli.interval),
        resources = ?reconciler.config().allowlist,
        "reaper starting"
    );

    let settings = LoopSettings { interval: cli.interval, max_failures: cli.max_failures, once: cli.once };
    supervise(|| reconciler.reconcile(), settings, shutdown_signal()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_map_onto_sweep_config() {
        let cli = Cli::try_parse_from(["reaper"]).expect("parse");
        let cfg = cli.sweep_config();
        assert_eq!(cfg, SweepConfig::default());
        assert_eq!(cli.interval, Duration::from_secs(300));
        assert_eq!(cli.max_failures, 10);
        assert!(!cli.once);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "reaper",
            "--execution-timeout",
            "1h30m",
            "--throttle",
            "0",
            "--resources",
            "pods, jobs,",
            "--force-delete-retry",
        ])
        .expect("parse");
        let cfg = cli.sweep_config();
        assert_eq!(cfg.execution_timeout, Duration::from_secs(90 * 60));
        assert_eq!(cfg.throttle, Duration::ZERO);
        assert_eq!(cfg.allowlist, vec!["pods".to_string(), "jobs".to_string()]);
        assert!(cfg.force_delete_retry);
    }

    #[test]
    fn rejects_unparseable_durations() {
        assert!(Cli::try_parse_from(["reaper", "--interval", "soon"]).is_err());
    }
}
