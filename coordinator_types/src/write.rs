//! Per-request write options and the values they are parsed from.

use std::{fmt::Display, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tag_mapping::MapTagsOptions;

/// Whether a write carries raw samples or already-aggregated values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsType {
    Unaggregated,
    Aggregated,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetricsTypeError {
    #[error("invalid metrics type '{0}', expected one of: unaggregated, aggregated")]
    Invalid(String),
}

impl FromStr for MetricsType {
    type Err = MetricsTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unaggregated" => Ok(Self::Unaggregated),
            "aggregated" => Ok(Self::Aggregated),
            _ => Err(MetricsTypeError::Invalid(s.to_string())),
        }
    }
}

impl Display for MetricsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unaggregated => write!(f, "unaggregated"),
            Self::Aggregated => write!(f, "aggregated"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoragePolicyError {
    #[error("storage policy must be of the form resolution[@precision]:retention, got '{0}'")]
    Malformed(String),

    #[error("invalid duration '{value}' in storage policy: {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("storage policy durations must be non-zero")]
    ZeroDuration,

    #[error("storage policy precision {precision:?} is coarser than resolution {resolution:?}")]
    PrecisionExceedsResolution {
        precision: Duration,
        resolution: Duration,
    },

    #[error("storage policy retention {retention:?} is shorter than resolution {resolution:?}")]
    RetentionBelowResolution {
        retention: Duration,
        resolution: Duration,
    },
}

/// How long and at what granularity a downsampled series is stored.
///
/// Parsed from `resolution:retention` or `resolution@precision:retention`,
/// e.g. `1m:48h` or `10s@1s:2d`. When no precision is given it is one second
/// for whole-second resolutions and one millisecond otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoragePolicy {
    resolution: Duration,
    precision: Duration,
    retention: Duration,
}

impl StoragePolicy {
    pub fn new(
        resolution: Duration,
        precision: Duration,
        retention: Duration,
    ) -> Result<Self, StoragePolicyError> {
        if resolution.is_zero() || precision.is_zero() || retention.is_zero() {
            return Err(StoragePolicyError::ZeroDuration);
        }
        if precision > resolution {
            return Err(StoragePolicyError::PrecisionExceedsResolution {
                precision,
                resolution,
            });
        }
        if retention < resolution {
            return Err(StoragePolicyError::RetentionBelowResolution {
                retention,
                resolution,
            });
        }
        Ok(Self {
            resolution,
            precision,
            retention,
        })
    }

    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    pub fn precision(&self) -> Duration {
        self.precision
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

fn parse_policy_duration(value: &str) -> Result<Duration, StoragePolicyError> {
    humantime::parse_duration(value).map_err(|e| StoragePolicyError::InvalidDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl FromStr for StoragePolicy {
    type Err = StoragePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resolution, retention) = s
            .split_once(':')
            .ok_or_else(|| StoragePolicyError::Malformed(s.to_string()))?;
        if resolution.is_empty() || retention.is_empty() || retention.contains(':') {
            return Err(StoragePolicyError::Malformed(s.to_string()));
        }

        let (resolution, precision) = match resolution.split_once('@') {
            Some((resolution, precision)) => (
                parse_policy_duration(resolution)?,
                Some(parse_policy_duration(precision)?),
            ),
            None => (parse_policy_duration(resolution)?, None),
        };
        let precision = precision.unwrap_or_else(|| {
            if resolution.subsec_nanos() == 0 {
                Duration::from_secs(1)
            } else {
                Duration::from_millis(1)
            }
        });

        Self::new(resolution, precision, parse_policy_duration(retention)?)
    }
}

/// Render a duration with the largest unit that divides it exactly.
fn fmt_policy_duration(d: Duration, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    const UNITS: [(&str, u128); 5] = [
        ("d", 86_400_000),
        ("h", 3_600_000),
        ("m", 60_000),
        ("s", 1_000),
        ("ms", 1),
    ];
    let millis = d.as_millis();
    for (suffix, size) in UNITS {
        if millis >= size && millis % size == 0 {
            return write!(f, "{}{suffix}", millis / size);
        }
    }
    write!(f, "{}ns", d.as_nanos())
}

impl Display for StoragePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_policy_duration(self.resolution, f)?;
        write!(f, "@")?;
        fmt_policy_duration(self.precision, f)?;
        write!(f, ":")?;
        fmt_policy_duration(self.retention, f)
    }
}

/// Overrides applied to a single write, derived from the request headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Skip the configured downsampling rules; only direct writes are made.
    pub downsample_override: bool,
    /// Write exclusively to [`Self::write_storage_policies`].
    pub write_override: bool,
    pub write_storage_policies: Vec<StoragePolicy>,
    /// The tag mapping directive that was applied to the series, if any.
    pub map_tags: Option<MapTagsOptions>,
}
