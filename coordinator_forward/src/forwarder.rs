//! Fan out of a write to every configured forward target.

use std::sync::Arc;

use bytes::Bytes;
use coordinator_ingest::series::time_from_millis;
use iox_time::TimeProvider;
use metric::{DurationHistogram, U64Counter};
use observability_deps::tracing::{debug, error};

use crate::context::ForwardContext;
use crate::dispatch::{Dispatcher, ForwardPayload};
use crate::error::{ForwardError, Result};
use crate::options::{ForwardTargetOptions, ForwardingOptions};
use crate::pool::WorkerPool;
use crate::retry::Retrier;
use crate::shadow::{ShadowMetrics, build_shadow_body};

#[derive(Debug)]
struct ForwardMetrics {
    success: U64Counter,
    error: U64Counter,
    dropped: U64Counter,
    delay: DurationHistogram,
    shadow: ShadowMetrics,
}

impl ForwardMetrics {
    fn new(registry: &metric::Registry) -> Self {
        let forwards = registry.register_metric::<U64Counter>(
            "coordinator_remote_write_forwards",
            "number of remote writes forwarded to a target, by outcome",
        );
        let shadow = registry.register_metric::<U64Counter>(
            "coordinator_remote_write_shadow_series",
            "number of series considered for a shadow forward, by decision",
        );
        let delay = registry
            .register_metric::<DurationHistogram>(
                "coordinator_remote_write_forward_delay",
                "age of forwarded samples once their forward completed, retries included",
            )
            .recorder(&[]);

        Self {
            success: forwards.recorder(&[("result", "success")]),
            error: forwards.recorder(&[("result", "error")]),
            dropped: forwards.recorder(&[("result", "dropped")]),
            delay,
            shadow: ShadowMetrics {
                keep: shadow.recorder(&[("decision", "keep")]),
                drop: shadow.recorder(&[("decision", "drop")]),
            },
        }
    }
}

/// Forwards every write to the configured targets in the background.
///
/// Forwards never affect the write they were triggered by: they run on the
/// [`ForwardContext`], and their outcome is only visible in metrics and logs.
#[derive(Debug)]
pub struct Forwarder {
    targets: Vec<ForwardTargetOptions>,
    dispatcher: Dispatcher,
    retrier: Retrier,
    pool: WorkerPool,
    ctx: ForwardContext,
    time_provider: Arc<dyn TimeProvider>,
    metrics: ForwardMetrics,
}

impl Forwarder {
    pub fn new(
        opts: ForwardingOptions,
        ctx: ForwardContext,
        time_provider: Arc<dyn TimeProvider>,
        registry: &metric::Registry,
    ) -> Result<Self, reqwest::Error> {
        debug!(
            targets = opts.targets.len(),
            max_concurrency = opts.max_concurrency,
            timeout = ?opts.timeout,
            "initialised remote write forwarding"
        );
        Ok(Self {
            dispatcher: Dispatcher::new(opts.timeout)?,
            retrier: Retrier::new(opts.retry),
            pool: WorkerPool::new(opts.max_concurrency),
            targets: opts.targets,
            ctx,
            time_provider,
            metrics: ForwardMetrics::new(registry),
        })
    }

    pub fn targets(&self) -> &[ForwardTargetOptions] {
        &self.targets
    }

    pub fn context(&self) -> &ForwardContext {
        &self.ctx
    }

    /// Start one forward of `payload` per target, returning how many were
    /// started. Forwards that find the pool saturated are dropped.
    pub fn forward(self: &Arc<Self>, payload: Arc<ForwardPayload>) -> usize {
        let mut spawned = 0;
        for idx in 0..self.targets.len() {
            let this = Arc::clone(self);
            let payload = Arc::clone(&payload);
            let task = async move { this.run(idx, &payload).await };

            if self.pool.go_if_available(self.ctx.tracker(), task) {
                spawned += 1;
            } else {
                self.metrics.dropped.inc(1);
                debug!(url = %self.targets[idx].url, "forward pool saturated, dropping forward");
            }
        }
        spawned
    }

    async fn run(&self, idx: usize, payload: &ForwardPayload) {
        let target = &self.targets[idx];
        let res = self
            .ctx
            .run_until_shutdown(self.forward_to(target, payload))
            .await
            .unwrap_or(Err(ForwardError::Shutdown));

        let now = self.time_provider.now();
        for sample in payload.request.timeseries.iter().flat_map(|s| &s.samples) {
            let sampled_at = time_from_millis(sample.timestamp);
            if let Some(age) = now.checked_duration_since(sampled_at) {
                self.metrics.delay.record(age);
            }
        }

        match res {
            Ok(()) => self.metrics.success.inc(1),
            Err(e) => {
                self.metrics.error.inc(1);
                error!(url = %target.url, error = %e, "forward error");
            }
        }
    }

    async fn forward_to(&self, target: &ForwardTargetOptions, payload: &ForwardPayload) -> Result<()> {
        let body = match &target.shadow {
            Some(shadow) => Bytes::from(build_shadow_body(
                &payload.request,
                shadow,
                &self.metrics.shadow,
            )?),
            None => payload.compressed.clone(),
        };

        let attempt = || self.dispatcher.send(target, body.clone(), payload.headers());
        if target.no_retry {
            attempt().await
        } else {
            self.retrier
                .attempt(self.ctx.shutdown_token(), attempt)
                .await
        }
    }
}
