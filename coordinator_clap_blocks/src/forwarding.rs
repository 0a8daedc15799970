//! CLI config for remote write forwarding

use std::time::Duration;

use coordinator_forward::{ForwardTargetOptions, ForwardingOptions, RetryConfig};

/// The JSON encoded list of forward targets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardTargets(pub Vec<ForwardTargetOptions>);

fn parse_targets(s: &str) -> Result<ForwardTargets, String> {
    if s.trim().is_empty() {
        return Ok(ForwardTargets::default());
    }
    serde_json::from_str(s)
        .map(ForwardTargets)
        .map_err(|e| format!("invalid forward targets JSON: {e}"))
}

/// CLI config for remote write forwarding
#[derive(Debug, Clone, clap::Parser)]
#[allow(missing_copy_implementations)]
pub struct ForwardingConfig {
    /// Downstream coordinators every remote write is forwarded to, as a JSON
    /// array of targets, e.g.
    /// `[{"url": "http://other:7201/api/v1/prom/remote/write", "no_retry": true}]`.
    ///
    /// A target with a `shadow` section, e.g. `{"percent": 0.1, "hash":
    /// "xxhash"}`, only receives that fraction of the series of each write.
    #[clap(
        long = "prom-remote-write-forward-targets",
        env = "COORDINATOR_PROM_REMOTE_WRITE_FORWARD_TARGETS",
        default_value = "",
        value_parser = parse_targets,
        action
    )]
    pub targets: ForwardTargets,

    /// Maximum number of forwards in flight across all requests. Forwards
    /// beyond it are dropped rather than queued.
    ///
    /// Zero leaves forwarding unbounded.
    #[clap(
        long = "prom-remote-write-forward-max-concurrency",
        env = "COORDINATOR_PROM_REMOTE_WRITE_FORWARD_MAX_CONCURRENCY",
        default_value = "0",
        action
    )]
    pub max_concurrency: usize,

    /// Deadline of a single forward attempt.
    #[clap(
        long = "prom-remote-write-forward-timeout",
        env = "COORDINATOR_PROM_REMOTE_WRITE_FORWARD_TIMEOUT",
        default_value = "15s",
        value_parser = humantime::parse_duration,
        action
    )]
    pub timeout: Duration,

    /// Backoff before the first retry of a failed forward.
    #[clap(
        long = "prom-remote-write-forward-retry-initial-backoff",
        env = "COORDINATOR_PROM_REMOTE_WRITE_FORWARD_RETRY_INITIAL_BACKOFF",
        default_value = "2s",
        value_parser = humantime::parse_duration,
        action
    )]
    pub retry_initial_backoff: Duration,

    /// Multiplier applied to the backoff after every retry.
    #[clap(
        long = "prom-remote-write-forward-retry-backoff-factor",
        env = "COORDINATOR_PROM_REMOTE_WRITE_FORWARD_RETRY_BACKOFF_FACTOR",
        default_value = "2",
        action
    )]
    pub retry_backoff_factor: f64,

    /// Upper bound of a single backoff; unbounded if unset.
    #[clap(
        long = "prom-remote-write-forward-retry-max-backoff",
        env = "COORDINATOR_PROM_REMOTE_WRITE_FORWARD_RETRY_MAX_BACKOFF",
        value_parser = humantime::parse_duration,
        action
    )]
    pub retry_max_backoff: Option<Duration>,

    /// Retries after the first attempt of a forward.
    #[clap(
        long = "prom-remote-write-forward-retry-max-retries",
        env = "COORDINATOR_PROM_REMOTE_WRITE_FORWARD_RETRY_MAX_RETRIES",
        default_value = "1",
        action
    )]
    pub retry_max_retries: u32,

    /// Retry failed forwards until they succeed or the process shuts down.
    #[clap(
        long = "prom-remote-write-forward-retry-forever",
        env = "COORDINATOR_PROM_REMOTE_WRITE_FORWARD_RETRY_FOREVER",
        default_value = "false",
        action
    )]
    pub retry_forever: bool,

    /// Randomize each backoff within half of its value.
    #[clap(
        long = "prom-remote-write-forward-retry-jitter",
        env = "COORDINATOR_PROM_REMOTE_WRITE_FORWARD_RETRY_JITTER",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub retry_jitter: bool,
}

impl ForwardingConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_backoff: self.retry_initial_backoff,
            backoff_factor: self.retry_backoff_factor,
            max_backoff: self.retry_max_backoff,
            max_retries: self.retry_max_retries,
            forever: self.retry_forever,
            jitter: self.retry_jitter,
        }
    }

    /// Forwarding options, or `None` when no targets are configured.
    pub fn forwarding_options(&self) -> Option<ForwardingOptions> {
        if self.targets.0.is_empty() {
            return None;
        }
        Some(ForwardingOptions {
            targets: self.targets.0.clone(),
            max_concurrency: self.max_concurrency,
            timeout: self.timeout,
            retry: self.retry_config(),
        })
    }
}
