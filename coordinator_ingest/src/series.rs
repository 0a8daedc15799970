//! The normalized form of a series handed to the storage engine.

use coordinator_types::prompb::{self, Label, MetricType};
use iox_time::Time;
use thiserror::Error;

/// Default maximum length, in bytes, of a tag name or value.
pub const DEFAULT_MAX_TAG_LITERAL_LENGTH: usize = 255;

/// How the identifier of a series is built from its tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdScheme {
    /// `name="value"` pairs sorted by name and joined with commas.
    #[default]
    Quoted,
    /// Tag values joined with dots, in tag order, e.g. `servers.host1.cpu`.
    Graphite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagOptions {
    max_tag_literal_length: usize,
    id_scheme: IdScheme,
}

impl Default for TagOptions {
    fn default() -> Self {
        Self {
            max_tag_literal_length: DEFAULT_MAX_TAG_LITERAL_LENGTH,
            id_scheme: IdScheme::default(),
        }
    }
}

impl TagOptions {
    pub fn with_max_tag_literal_length(mut self, max: usize) -> Self {
        self.max_tag_literal_length = max;
        self
    }

    pub fn with_id_scheme(mut self, id_scheme: IdScheme) -> Self {
        self.id_scheme = id_scheme;
        self
    }

    pub fn max_tag_literal_length(&self) -> usize {
        self.max_tag_literal_length
    }

    pub fn id_scheme(&self) -> IdScheme {
        self.id_scheme
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

/// The tags of a series, sorted by name, or by path index for
/// [`IdScheme::Graphite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tags {
    tags: Vec<Tag>,
    id_scheme: IdScheme,
}

impl Tags {
    pub const fn empty() -> Self {
        Self {
            tags: Vec::new(),
            id_scheme: IdScheme::Quoted,
        }
    }

    /// Build tags from wire labels, which may arrive in any order.
    pub fn from_labels(labels: &[Label], opts: TagOptions) -> Self {
        let mut tags: Vec<Tag> = labels
            .iter()
            .map(|l| Tag {
                name: l.name.clone(),
                value: l.value.clone(),
            })
            .collect();
        match opts.id_scheme() {
            IdScheme::Quoted => tags.sort_by(|a, b| a.name.cmp(&b.name)),
            IdScheme::Graphite => tags.sort_by(|a, b| {
                match (graphite_index(&a.name), graphite_index(&b.name)) {
                    (Some(a), Some(b)) => a.cmp(&b),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => a.name.cmp(&b.name),
                }
            }),
        }
        Self {
            tags,
            id_scheme: opts.id_scheme(),
        }
    }

    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        match self.id_scheme {
            IdScheme::Quoted => self
                .tags
                .binary_search_by(|t| t.name.as_slice().cmp(name))
                .ok()
                .map(|idx| self.tags[idx].value.as_slice()),
            IdScheme::Graphite => self
                .tags
                .iter()
                .find(|t| t.name == name)
                .map(|t| t.value.as_slice()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// The identifier of the series these tags belong to.
    pub fn id(&self) -> Vec<u8> {
        let mut id = Vec::new();
        match self.id_scheme {
            IdScheme::Quoted => {
                for (i, tag) in self.tags.iter().enumerate() {
                    if i > 0 {
                        id.push(b',');
                    }
                    id.extend_from_slice(&tag.name);
                    id.extend_from_slice(b"=\"");
                    for &b in &tag.value {
                        if b == b'"' || b == b'\\' {
                            id.push(b'\\');
                        }
                        id.push(b);
                    }
                    id.push(b'"');
                }
            }
            IdScheme::Graphite => {
                for (i, tag) in self.tags.iter().enumerate() {
                    if i > 0 {
                        id.push(b'.');
                    }
                    id.extend_from_slice(&tag.value);
                }
            }
        }
        id
    }
}

/// The path index of a graphite tag name, `__g<N>__`.
fn graphite_index(name: &[u8]) -> Option<u64> {
    let digits = name.strip_prefix(b"__g")?.strip_suffix(b"__")?;
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datapoint {
    pub timestamp: Time,
    pub value: f64,
}

/// Convert a wire timestamp in milliseconds since the epoch.
pub fn time_from_millis(millis: i64) -> Time {
    Time::from_timestamp_nanos(millis.saturating_mul(1_000_000))
}

pub fn datapoints_from_samples(samples: &[prompb::Sample]) -> Vec<Datapoint> {
    samples
        .iter()
        .map(|s| Datapoint {
            timestamp: time_from_millis(s.timestamp),
            value: s.value,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    Second,
    #[default]
    Millisecond,
    Microsecond,
    Nanosecond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceType {
    #[default]
    Prometheus,
    Graphite,
}

/// Where a series came from and how its values should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesAttributes {
    pub metric_type: MetricType,
    pub source: SourceType,
    /// Counter-like series, whose values may reset to zero.
    pub handle_value_resets: bool,
}

impl Default for SeriesAttributes {
    fn default() -> Self {
        Self {
            metric_type: MetricType::Unknown,
            source: SourceType::Prometheus,
            handle_value_resets: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SeriesAttributesError {
    #[error("invalid Prometheus metric type {0}")]
    InvalidMetricType(i32),

    #[error("invalid series source type {0}")]
    InvalidSource(i32),
}

impl TryFrom<&prompb::TimeSeries> for SeriesAttributes {
    type Error = SeriesAttributesError;

    fn try_from(series: &prompb::TimeSeries) -> Result<Self, Self::Error> {
        let metric_type = MetricType::try_from(series.r#type)
            .map_err(|_| SeriesAttributesError::InvalidMetricType(series.r#type))?;
        let source = match prompb::Source::try_from(series.source) {
            Ok(prompb::Source::Prometheus) => SourceType::Prometheus,
            Ok(prompb::Source::Graphite) => SourceType::Graphite,
            Err(_) => return Err(SeriesAttributesError::InvalidSource(series.source)),
        };
        let handle_value_resets = matches!(
            metric_type,
            MetricType::Counter | MetricType::Histogram | MetricType::Summary
        );
        Ok(Self {
            metric_type,
            source,
            handle_value_resets,
        })
    }
}

/// Per-series metadata that the storage engine may attach while iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Metadata {
    pub drop_unaggregated: bool,
}
