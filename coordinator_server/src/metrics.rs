use std::sync::Arc;

use coordinator_ingest::series::time_from_millis;
use coordinator_types::prompb::WriteRequest;
use iox_time::TimeProvider;
use metric::{DurationHistogram, U64Counter};

#[derive(Debug)]
pub(crate) struct HandlerMetrics {
    pub(crate) success: U64Counter,
    pub(crate) client_error: U64Counter,
    pub(crate) server_error: U64Counter,
    pub(crate) batch_duration: DurationHistogram,
    ingest_delay: DurationHistogram,
}

impl HandlerMetrics {
    pub(crate) fn new(registry: &metric::Registry) -> Self {
        let requests = registry.register_metric::<U64Counter>(
            "coordinator_remote_write_requests",
            "number of remote write requests handled, by outcome",
        );
        let batch_duration = registry
            .register_metric::<DurationHistogram>(
                "coordinator_remote_write_batch_duration",
                "time taken to write a remote write batch locally",
            )
            .recorder(&[]);
        let ingest_delay = registry
            .register_metric::<DurationHistogram>(
                "coordinator_remote_write_ingest_delay",
                "age of samples once they have been written locally",
            )
            .recorder(&[]);

        Self {
            success: requests.recorder(&[("result", "success")]),
            client_error: requests.recorder(&[("result", "client_error")]),
            server_error: requests.recorder(&[("result", "server_error")]),
            batch_duration,
            ingest_delay,
        }
    }

    /// Count a failed request by which side is at fault.
    pub(crate) fn record_error(&self, status: hyper::StatusCode) {
        if status.is_client_error() {
            self.client_error.inc(1);
        } else {
            self.server_error.inc(1);
        }
    }

    /// Record the age of every sample in `req` as of now.
    pub(crate) fn record_ingest_delay(
        &self,
        req: &WriteRequest,
        time_provider: &Arc<dyn TimeProvider>,
    ) {
        let now = time_provider.now();
        for sample in req.timeseries.iter().flat_map(|s| &s.samples) {
            let sampled_at = time_from_millis(sample.timestamp);
            if let Some(age) = now.checked_duration_since(sampled_at) {
                self.ingest_delay.record(age);
            }
        }
    }
}
