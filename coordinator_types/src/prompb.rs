//! Prometheus remote write protobuf messages.
//!
//! The messages are declared by hand with the `prost` derives instead of being
//! generated from a `.proto` file: the structure is small and stable. Field
//! tags follow the remote write protocol, with the series type and source
//! carried as extra fields on [`TimeSeries`].
//!
//! Label names and values are kept as raw bytes, they are not guaranteed to
//! be valid UTF-8 nor sorted by name on the wire.

/// A batch of time series, the body of a remote write request.
#[derive(prost::Message, Clone, PartialEq)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

/// One series and the samples written to it.
#[derive(prost::Message, Clone, PartialEq)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
    /// A [`MetricType`], left as the raw wire value so undefined values can
    /// be reported instead of silently dropped.
    #[prost(enumeration = "MetricType", tag = "3")]
    pub r#type: i32,
    /// A [`Source`], left as the raw wire value.
    #[prost(enumeration = "Source", tag = "4")]
    pub source: i32,
}

#[derive(prost::Message, Clone, PartialEq, Eq)]
pub struct Label {
    #[prost(bytes = "vec", tag = "1")]
    pub name: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

impl Label {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A single sample, timestamp in milliseconds since the epoch.
#[derive(prost::Message, Clone, Copy, PartialEq)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MetricType {
    Unknown = 0,
    Counter = 1,
    Gauge = 2,
    Histogram = 3,
    GaugeHistogram = 4,
    Summary = 5,
    Info = 6,
    Stateset = 7,
}

impl MetricType {
    /// Map the value of the metric type override header onto a [`MetricType`]
    ///
    /// Matching is case-insensitive; `unknown` is deliberately not accepted.
    pub fn from_header_value(value: &str) -> Option<Self> {
        let tp = match value.to_ascii_lowercase().as_str() {
            "counter" => Self::Counter,
            "gauge" => Self::Gauge,
            "gauge_histogram" => Self::GaugeHistogram,
            "histogram" => Self::Histogram,
            "info" => Self::Info,
            "stateset" => Self::Stateset,
            "summary" => Self::Summary,
            _ => return None,
        };
        Some(tp)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Source {
    Prometheus = 0,
    Graphite = 1,
}

impl TimeSeries {
    pub fn new(labels: Vec<Label>, samples: Vec<Sample>) -> Self {
        Self {
            labels,
            samples,
            r#type: MetricType::Unknown as i32,
            source: Source::Prometheus as i32,
        }
    }

    pub fn with_type(mut self, tp: MetricType) -> Self {
        self.r#type = tp as i32;
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source as i32;
        self
    }
}
