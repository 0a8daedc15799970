//! Decoding and validation of a remote write request.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use coordinator_types::{
    headers::{
        AGGREGATE_WRITE_TYPE, DEFAULT_WRITE_TYPE, MAP_TAGS_BY_JSON_HEADER,
        METRICS_STORAGE_POLICY_HEADER, METRICS_TYPE_HEADER, PROM_TYPE_HEADER, WRITE_TYPE_HEADER,
    },
    prompb::{Label, MetricType, WriteRequest},
    tag_mapping::{MapTagsOptions, TagMappingError},
    write::{MetricsType, MetricsTypeError, StoragePolicy, StoragePolicyError, WriteOptions},
};
use http::{HeaderMap, header::ToStrError};
use observability_deps::tracing::warn;
use prost::Message;
use thiserror::Error;

/// How many over-long labels are logged before those logs are suppressed.
pub const MAX_LITERAL_TOO_LONG_LOG_COUNT: u32 = 10;

/// How much of an over-long label name or value is logged.
pub const LITERAL_PREFIX_LENGTH: usize = 100;

/// A request that could not be parsed; always the client's fault.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("header '{name}' is not valid UTF-8: {source}")]
    HeaderNotUtf8 {
        name: &'static str,
        #[source]
        source: ToStrError,
    },

    #[error(transparent)]
    MetricsType(#[from] MetricsTypeError),

    #[error("storage policy should not be set for unaggregated metrics")]
    UnaggregatedStoragePolicy,

    #[error("could not parse storage policy: {0}")]
    StoragePolicy(#[from] StoragePolicyError),

    #[error("unrecognized write type: {0}")]
    WriteType(String),

    #[error("empty request body")]
    EmptyBody,

    #[error("failed to decompress request body: {0}")]
    Decompress(#[source] snap::Error),

    #[error("failed to decode write request: {0}")]
    Decode(#[source] prost::DecodeError),

    #[error("invalid tag mapping JSON: {0}")]
    MapTagsJson(#[source] serde_json::Error),

    #[error("invalid tag mapping: {0}")]
    MapTags(#[from] TagMappingError),

    #[error("unknown prom metric type {0}")]
    PromType(String),

    #[error(
        "label literal is too long: nameLength={name_length}, valueLength={value_length}, \
        maxLength={max_length}"
    )]
    LiteralTooLong {
        name_length: usize,
        value_length: usize,
        max_length: usize,
    },
}

/// A decoded remote write, ready to be written and forwarded.
#[derive(Debug)]
pub struct ParsedRequest {
    pub request: WriteRequest,
    /// The snappy compressed body as received.
    pub compressed: Bytes,
    pub options: WriteOptions,
}

/// Logs the first [`MAX_LITERAL_TOO_LONG_LOG_COUNT`] over-long labels seen.
#[derive(Debug, Default)]
pub struct LiteralTooLongLog {
    seen: AtomicU32,
}

impl LiteralTooLongLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of over-long labels seen so far, logged or not.
    pub fn seen(&self) -> u32 {
        self.seen.load(Ordering::Relaxed)
    }

    /// Log `label` unless the cap has been reached, returning whether it was
    /// logged.
    pub fn maybe_log(&self, label: &Label) -> bool {
        let seen = self.seen.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        if seen > MAX_LITERAL_TOO_LONG_LOG_COUNT {
            return false;
        }
        warn!(
            name_prefix = %String::from_utf8_lossy(safe_prefix(&label.name)),
            name_length = label.name.len(),
            value_prefix = %String::from_utf8_lossy(safe_prefix(&label.value)),
            value_length = label.value.len(),
            "label exceeds literal length limits"
        );
        true
    }
}

fn safe_prefix(b: &[u8]) -> &[u8] {
    &b[..b.len().min(LITERAL_PREFIX_LENGTH)]
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, ParseError> {
    headers
        .get(name)
        .map(|v| v.to_str().map(str::trim))
        .transpose()
        .map(|v| v.filter(|v| !v.is_empty()))
        .map_err(|source| ParseError::HeaderNotUtf8 { name, source })
}

/// Build the [`WriteOptions`] selected by the request headers.
pub fn parse_write_options(headers: &HeaderMap) -> Result<WriteOptions, ParseError> {
    let mut opts = WriteOptions::default();

    if let Some(v) = header(headers, METRICS_TYPE_HEADER)? {
        let metrics_type: MetricsType = v.parse()?;

        // Override the default rules with none at all, so only direct
        // writes are made.
        opts.downsample_override = true;

        let policy = header(headers, METRICS_STORAGE_POLICY_HEADER)?;
        match metrics_type {
            MetricsType::Unaggregated => {
                if policy.is_some() {
                    return Err(ParseError::UnaggregatedStoragePolicy);
                }
            }
            MetricsType::Aggregated => {
                let policy: StoragePolicy = policy.unwrap_or_default().parse()?;
                opts.write_override = true;
                opts.write_storage_policies = vec![policy];
            }
        }
    }

    if let Some(v) = header(headers, WRITE_TYPE_HEADER)? {
        match v {
            DEFAULT_WRITE_TYPE => {}
            AGGREGATE_WRITE_TYPE => {
                opts.write_override = true;
                opts.write_storage_policies = vec![];
            }
            _ => return Err(ParseError::WriteType(v.to_string())),
        }
    }

    Ok(opts)
}

/// Decode a snappy compressed protobuf write request.
pub fn decode_body(body: &[u8]) -> Result<WriteRequest, ParseError> {
    if body.is_empty() {
        return Err(ParseError::EmptyBody);
    }
    let raw = snap::raw::Decoder::new()
        .decompress_vec(body)
        .map_err(ParseError::Decompress)?;
    WriteRequest::decode(raw.as_slice()).map_err(ParseError::Decode)
}

/// Parse and validate a remote write.
///
/// Header derived options are checked before the body is decoded; the tag
/// mapping and metric type override are then applied to every series before
/// label lengths are checked against `max_literal_length`.
pub fn parse_request(
    headers: &HeaderMap,
    body: Bytes,
    max_literal_length: usize,
    literal_log: &LiteralTooLongLog,
) -> Result<ParsedRequest, ParseError> {
    let mut options = parse_write_options(headers)?;
    let mut request = decode_body(&body)?;

    if let Some(v) = header(headers, MAP_TAGS_BY_JSON_HEADER)? {
        let map_tags: MapTagsOptions = serde_json::from_str(v).map_err(ParseError::MapTagsJson)?;
        map_tags.apply(&mut request)?;
        options.map_tags = Some(map_tags);
    }

    if let Some(v) = header(headers, PROM_TYPE_HEADER)? {
        let tp = MetricType::from_header_value(v)
            .ok_or_else(|| ParseError::PromType(v.to_string()))?;
        for series in &mut request.timeseries {
            series.r#type = tp as i32;
        }
    }

    let too_long = request
        .timeseries
        .iter()
        .flat_map(|s| &s.labels)
        .find(|l| l.name.len() > max_literal_length || l.value.len() > max_literal_length);
    if let Some(label) = too_long {
        literal_log.maybe_log(label);
        return Err(ParseError::LiteralTooLong {
            name_length: label.name.len(),
            value_length: label.value.len(),
            max_length: max_literal_length,
        });
    }

    Ok(ParsedRequest {
        request,
        compressed: body,
        options,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coordinator_types::prompb::TimeSeries;
    use coordinator_types::tag_mapping::{TagMapper, WriteOp};
    use http::HeaderValue;
    use pretty_assertions::assert_eq;

    use super::*;

    fn encode(req: &WriteRequest) -> Bytes {
        snap::raw::Encoder::new()
            .compress_vec(&req.encode_to_vec())
            .unwrap()
            .into()
    }

    fn request() -> WriteRequest {
        WriteRequest {
            timeseries: vec![
                TimeSeries::new(
                    vec![Label::new("__name__", "cpu"), Label::new("host", "a")],
                    vec![],
                ),
                TimeSeries::new(vec![Label::new("__name__", "mem")], vec![]),
            ],
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|&(k, v)| {
                (
                    http::HeaderName::from_static(k),
                    HeaderValue::from_static(v),
                )
            })
            .collect()
    }

    fn parse(pairs: &[(&'static str, &'static str)], body: Bytes) -> Result<ParsedRequest, ParseError> {
        parse_request(&headers(pairs), body, 255, &LiteralTooLongLog::new())
    }

    #[test]
    fn no_headers() {
        let body = encode(&request());
        let parsed = parse(&[], body.clone()).unwrap();
        assert_eq!(request(), parsed.request);
        assert_eq!(body, parsed.compressed);
        assert_eq!(WriteOptions::default(), parsed.options);
    }

    #[test]
    fn metrics_type_and_storage_policy() {
        let opts = parse_write_options(&headers(&[(METRICS_TYPE_HEADER, "unaggregated")])).unwrap();
        assert!(opts.downsample_override);
        assert!(!opts.write_override);

        let err = parse_write_options(&headers(&[
            (METRICS_TYPE_HEADER, "unaggregated"),
            (METRICS_STORAGE_POLICY_HEADER, "1m:2d"),
        ]))
        .unwrap_err();
        assert_eq!(
            "storage policy should not be set for unaggregated metrics",
            err.to_string()
        );

        let opts = parse_write_options(&headers(&[
            (METRICS_TYPE_HEADER, " aggregated "),
            (METRICS_STORAGE_POLICY_HEADER, "1m:2d"),
        ]))
        .unwrap();
        assert!(opts.downsample_override);
        assert!(opts.write_override);
        assert_eq!(1, opts.write_storage_policies.len());
        assert_eq!(
            Duration::from_secs(60),
            opts.write_storage_policies[0].resolution()
        );

        let err =
            parse_write_options(&headers(&[(METRICS_TYPE_HEADER, "aggregated")])).unwrap_err();
        assert!(matches!(err, ParseError::StoragePolicy(_)), "{err}");

        let err = parse_write_options(&headers(&[(METRICS_TYPE_HEADER, "raw")])).unwrap_err();
        assert!(
            matches!(&err, ParseError::MetricsType(MetricsTypeError::Invalid(v)) if v == "raw"),
            "{err}"
        );
    }

    #[test]
    fn write_type() {
        let opts = parse_write_options(&headers(&[(WRITE_TYPE_HEADER, "default")])).unwrap();
        assert_eq!(WriteOptions::default(), opts);

        let opts = parse_write_options(&headers(&[
            (METRICS_TYPE_HEADER, "aggregated"),
            (METRICS_STORAGE_POLICY_HEADER, "1m:2d"),
            (WRITE_TYPE_HEADER, "aggregate"),
        ]))
        .unwrap();
        assert!(opts.write_override);
        assert!(opts.write_storage_policies.is_empty());

        let err = parse_write_options(&headers(&[(WRITE_TYPE_HEADER, "bulk")])).unwrap_err();
        assert_eq!("unrecognized write type: bulk", err.to_string());
    }

    #[test]
    fn header_errors_win_over_body_errors() {
        let err = parse(&[(WRITE_TYPE_HEADER, "bulk")], Bytes::from_static(b"garbage")).unwrap_err();
        assert!(matches!(err, ParseError::WriteType(_)), "{err}");
    }

    #[test]
    fn bad_bodies() {
        assert!(matches!(parse(&[], Bytes::new()), Err(ParseError::EmptyBody)));
        assert!(matches!(
            parse(&[], Bytes::from_static(b"\xff\xff\xff\xff")),
            Err(ParseError::Decompress(_))
        ));
        let not_proto = snap::raw::Encoder::new().compress_vec(b"\xff\xff").unwrap();
        assert!(matches!(
            parse(&[], not_proto.into()),
            Err(ParseError::Decode(_))
        ));
    }

    #[test]
    fn map_tags_then_prom_type() {
        let parsed = parse(
            &[
                (MAP_TAGS_BY_JSON_HEADER, r#"{"tagMappers":[{"write":{"tag":"env","value":"prod"}}]}"#),
                (PROM_TYPE_HEADER, "Counter"),
            ],
            encode(&request()),
        )
        .unwrap();
        for series in &parsed.request.timeseries {
            assert_eq!(MetricType::Counter as i32, series.r#type);
            assert!(series.labels.contains(&Label::new("env", "prod")));
        }
        assert_eq!(
            Some(MapTagsOptions {
                tag_mappers: vec![TagMapper {
                    write: Some(WriteOp {
                        tag: "env".into(),
                        value: "prod".into(),
                    }),
                    ..Default::default()
                }],
            }),
            parsed.options.map_tags
        );

        let err = parse(&[(PROM_TYPE_HEADER, "untyped")], encode(&request())).unwrap_err();
        assert_eq!("unknown prom metric type untyped", err.to_string());

        let err = parse(&[(MAP_TAGS_BY_JSON_HEADER, "{")], encode(&request())).unwrap_err();
        assert!(matches!(err, ParseError::MapTagsJson(_)), "{err}");

        let err = parse(&[(MAP_TAGS_BY_JSON_HEADER, r#"{"tagMappers":[{}]}"#)], encode(&request()))
            .unwrap_err();
        assert!(matches!(err, ParseError::MapTags(_)), "{err}");
    }

    #[test]
    fn literal_length_limit() {
        let mut req = request();
        req.timeseries[1]
            .labels
            .push(Label::new("host", "x".repeat(256)));
        let log = LiteralTooLongLog::new();

        let err = parse_request(&HeaderMap::new(), encode(&req), 255, &log).unwrap_err();
        assert_eq!(
            "label literal is too long: nameLength=4, valueLength=256, maxLength=255",
            err.to_string()
        );
        assert_eq!(1, log.seen());

        // Exactly at the limit is fine.
        req.timeseries[1].labels[1] = Label::new("host", "x".repeat(255));
        parse_request(&HeaderMap::new(), encode(&req), 255, &log).unwrap();
    }

    #[test]
    fn literal_log_is_capped() {
        let log = LiteralTooLongLog::new();
        let label = Label::new("n".repeat(300), "v");
        let logged = (0..25).filter(|_| log.maybe_log(&label)).count();
        assert_eq!(MAX_LITERAL_TOO_LONG_LOG_COUNT as usize, logged);
        assert_eq!(25, log.seen());
        assert_eq!(LITERAL_PREFIX_LENGTH, safe_prefix(&label.name).len());
        assert_eq!(b"v", safe_prefix(&label.value));
    }
}
