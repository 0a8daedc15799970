use std::future::Future;

use observability_deps::tracing::info;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// The process scoped lifetime forward tasks run under.
///
/// Forwards outlive the request that triggered them, so they are never tied to
/// a request's cancellation. Instead they are tracked here, and stop only when
/// the process shuts forwarding down.
#[derive(Debug, Clone, Default)]
pub struct ForwardContext {
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl ForwardContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancelled once forwarding shuts down.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tasks
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run `fut` until it completes or forwarding shuts down.
    pub async fn run_until_shutdown<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future + Send,
        F::Output: Send,
    {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Stop retrying, cancel in-flight attempts, and wait for every forward
    /// task to finish.
    pub async fn shutdown(&self) {
        info!(in_flight = self.tasks.len(), "shutting down forwarding");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Wait for every forward spawned so far to finish, without cancelling
    /// anything. Forwards spawned afterwards are still accepted.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn shutdown_cancels_pending_work() {
        let ctx = ForwardContext::new();
        let task_ctx = ctx.clone();
        ctx.tracker().spawn(async move {
            let out = task_ctx
                .run_until_shutdown(tokio::time::sleep(Duration::from_secs(3600)))
                .await;
            assert!(out.is_none());
        });

        tokio::time::timeout(Duration::from_secs(5), ctx.shutdown())
            .await
            .unwrap();
        assert!(ctx.is_shutdown());
        assert!(ctx.tracker().is_empty());
    }

    #[tokio::test]
    async fn drain_keeps_accepting_work() {
        let ctx = ForwardContext::new();
        ctx.tracker().spawn(async {});
        ctx.drain().await;
        assert!(!ctx.tracker().is_closed());
        assert!(!ctx.is_shutdown());
        assert_eq!(Some(42), ctx.run_until_shutdown(async { 42 }).await);
    }
}
