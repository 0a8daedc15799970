//! The remote write handler.

use std::sync::Arc;

use bytes::Bytes;
use coordinator_forward::{ForwardPayload, Forwarder};
use coordinator_ingest::{
    DownsamplerAndWriter,
    error::{BatchError, WriteError},
    iter::PromSeriesIter,
    series::TagOptions,
};
use coordinator_types::write::WriteOptions;
use http::HeaderMap;
use hyper::StatusCode;
use iox_time::TimeProvider;
use observability_deps::tracing::{debug, error};
use thiserror::Error;

use crate::classify::{Classification, classify};
use crate::metrics::HandlerMetrics;
use crate::parse::{LiteralTooLongLog, ParseError, ParsedRequest, parse_request};

#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request could not be parsed or failed validation.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The local write failed.
    #[error("{0}")]
    Write(Classification),
}

impl HandlerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Parse(_) => StatusCode::BAD_REQUEST,
            Self::Write(c) => c.status,
        }
    }
}

/// Writes remote write requests to the storage engine, forwarding each one
/// to the configured targets along the way.
///
/// The outcome of a write depends only on the local write; forwards run in
/// the background and are only observable through metrics and logs.
#[derive(Debug)]
pub struct WriteHandler {
    writer: Arc<dyn DownsamplerAndWriter>,
    tag_options: TagOptions,
    store_metrics_type: bool,
    forwarder: Option<Arc<Forwarder>>,
    time_provider: Arc<dyn TimeProvider>,
    metrics: HandlerMetrics,
    literal_log: LiteralTooLongLog,
}

impl WriteHandler {
    pub fn new(
        writer: Arc<dyn DownsamplerAndWriter>,
        time_provider: Arc<dyn TimeProvider>,
        registry: &metric::Registry,
    ) -> Self {
        Self {
            writer,
            tag_options: TagOptions::default(),
            store_metrics_type: false,
            forwarder: None,
            time_provider,
            metrics: HandlerMetrics::new(registry),
            literal_log: LiteralTooLongLog::new(),
        }
    }

    pub fn with_tag_options(mut self, tag_options: TagOptions) -> Self {
        self.tag_options = tag_options;
        self
    }

    /// Annotate every written series with its metric type.
    pub fn with_store_metrics_type(mut self, store_metrics_type: bool) -> Self {
        self.store_metrics_type = store_metrics_type;
        self
    }

    pub fn with_forwarder(mut self, forwarder: Arc<Forwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn forwarder(&self) -> Option<&Arc<Forwarder>> {
        self.forwarder.as_ref()
    }

    /// Parse, forward and write a snappy compressed remote write `body`.
    ///
    /// The local write runs on the caller's task and is abandoned if the
    /// returned future is dropped. Forwards are not.
    pub async fn write(
        &self,
        headers: &HeaderMap,
        body: Bytes,
        remote_addr: &str,
    ) -> Result<(), HandlerError> {
        let start = self.time_provider.now();
        let res = self.write_inner(headers, body, remote_addr).await;
        if let Some(elapsed) = self.time_provider.now().checked_duration_since(start) {
            self.metrics.batch_duration.record(elapsed);
        }

        match &res {
            Ok(()) => self.metrics.success.inc(1),
            Err(e) => self.metrics.record_error(e.status()),
        }
        res
    }

    async fn write_inner(
        &self,
        headers: &HeaderMap,
        body: Bytes,
        remote_addr: &str,
    ) -> Result<(), HandlerError> {
        let ParsedRequest {
            request,
            compressed,
            options,
        } = parse_request(
            headers,
            body,
            self.tag_options.max_tag_literal_length(),
            &self.literal_log,
        )
        .inspect_err(|e| debug!(error = %e, %remote_addr, "invalid remote write request"))?;

        let payload = Arc::new(ForwardPayload::new(request, compressed, headers));
        if let Some(forwarder) = &self.forwarder {
            forwarder.forward(Arc::clone(&payload));
        }

        let res = self.write_local(&payload, &options).await;
        self.metrics
            .record_ingest_delay(&payload.request, &self.time_provider);

        let Err(batch_err) = res else {
            return Ok(());
        };
        let classification = classify(&batch_err);
        error!(
            %remote_addr,
            status = classification.status.as_u16(),
            num_resource_exhausted_errors = classification.counts.resource_exhausted,
            num_regular_errors = classification.counts.regular,
            num_bad_request_errors = classification.counts.bad_request,
            last_regular_error = classification.last_regular.as_deref().unwrap_or_default(),
            last_bad_request_error = classification.last_bad_request.as_deref().unwrap_or_default(),
            "write error"
        );
        Err(HandlerError::Write(classification))
    }

    async fn write_local(
        &self,
        payload: &ForwardPayload,
        options: &WriteOptions,
    ) -> Result<(), BatchError> {
        let mut iter = PromSeriesIter::new(
            &payload.request.timeseries,
            self.tag_options,
            self.store_metrics_type,
        )
        .map_err(|e| BatchError::from(WriteError::other(e)))?;
        self.writer.write_batch(&mut iter, options).await
    }
}

#[cfg(test)]
mod tests {
    use coordinator_ingest::test_helpers::RecordingWriter;
    use coordinator_types::prompb::{Label, Sample, TimeSeries, WriteRequest};
    use iox_time::{MockProvider, Time};
    use metric::{Attributes, DurationHistogram, Metric, Registry, U64Counter};
    use pretty_assertions::assert_eq;
    use prost::Message;

    use super::*;

    const NOW_MILLIS: i64 = 1_700_000_000_000;

    fn body(req: &WriteRequest) -> Bytes {
        snap::raw::Encoder::new()
            .compress_vec(&req.encode_to_vec())
            .unwrap()
            .into()
    }

    fn request() -> WriteRequest {
        WriteRequest {
            timeseries: vec![TimeSeries::new(
                vec![Label::new("__name__", "up")],
                vec![
                    Sample {
                        value: 1.0,
                        timestamp: NOW_MILLIS - 1_000,
                    },
                    Sample {
                        value: 1.0,
                        timestamp: NOW_MILLIS - 2_000,
                    },
                ],
            )],
        }
    }

    struct Harness {
        handler: WriteHandler,
        writer: Arc<RecordingWriter>,
        registry: Registry,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Registry::default();
            let writer = Arc::new(RecordingWriter::new());
            let time_provider = Arc::new(MockProvider::new(Time::from_timestamp_nanos(
                NOW_MILLIS * 1_000_000,
            )));
            let handler = WriteHandler::new(
                Arc::clone(&writer) as Arc<dyn DownsamplerAndWriter>,
                time_provider,
                &registry,
            );
            Self {
                handler,
                writer,
                registry,
            }
        }

        fn requests(&self, result: &'static str) -> u64 {
            self.registry
                .get_instrument::<Metric<U64Counter>>("coordinator_remote_write_requests")
                .unwrap()
                .get_observer(&Attributes::from(&[("result", result)]))
                .unwrap()
                .fetch()
        }

        fn histogram_count(&self, name: &'static str) -> u64 {
            self.registry
                .get_instrument::<Metric<DurationHistogram>>(name)
                .unwrap()
                .get_observer(&Attributes::from(&[]))
                .unwrap()
                .fetch()
                .sample_count()
        }
    }

    #[tokio::test]
    async fn successful_write() {
        let h = Harness::new();
        h.handler
            .write(&HeaderMap::new(), body(&request()), "127.0.0.1")
            .await
            .unwrap();

        let calls = h.writer.calls();
        assert_eq!(1, calls.len());
        assert_eq!(1, calls[0].series.len());
        assert_eq!(1, h.requests("success"));
        assert_eq!(2, h.histogram_count("coordinator_remote_write_ingest_delay"));
        assert_eq!(1, h.histogram_count("coordinator_remote_write_batch_duration"));
    }

    #[tokio::test]
    async fn parse_errors_are_client_errors() {
        let h = Harness::new();
        let err = h
            .handler
            .write(&HeaderMap::new(), Bytes::new(), "127.0.0.1")
            .await
            .unwrap_err();

        assert_eq!(StatusCode::BAD_REQUEST, err.status());
        assert!(h.writer.calls().is_empty());
        assert_eq!(1, h.requests("client_error"));
        assert_eq!(0, h.histogram_count("coordinator_remote_write_ingest_delay"));
    }

    #[tokio::test]
    async fn write_errors_are_classified() {
        let h = Harness::new();
        h.writer
            .push_errors(vec![WriteError::resource_exhausted("slow down")]);
        h.writer.push_errors(vec![WriteError::other("disk full")]);

        let err = h
            .handler
            .write(&HeaderMap::new(), body(&request()), "127.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(StatusCode::TOO_MANY_REQUESTS, err.status());
        assert_eq!("bad_request_errors: count=0, last=slow down", err.to_string());

        let err = h
            .handler
            .write(&HeaderMap::new(), body(&request()), "127.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, err.status());

        assert_eq!(1, h.requests("client_error"));
        assert_eq!(1, h.requests("server_error"));
        // Ingest delay is recorded whatever the outcome of the write.
        assert_eq!(4, h.histogram_count("coordinator_remote_write_ingest_delay"));
    }

    #[tokio::test]
    async fn invalid_series_type_fails_the_write() {
        let h = Harness::new();
        let mut req = request();
        req.timeseries[0].r#type = 42;

        let err = h
            .handler
            .write(&HeaderMap::new(), body(&req), "127.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, err.status());
        assert_eq!(
            "retryable_errors: count=1, last=invalid Prometheus metric type 42",
            err.to_string()
        );
        assert!(h.writer.calls().is_empty());
    }
}
