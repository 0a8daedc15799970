//! Deterministic selection of the series forwarded to a shadow target.
//!
//! Each series is hashed on a pseudo ID built from its labels and placed in
//! one of [`SHADOW_BUCKETS`] buckets. A series is kept when its bucket falls
//! under the configured fraction of buckets, so every coordinator keeps the
//! same series for the same fraction without sharing any state.

use std::{fmt::Display, io::Cursor, str::FromStr};

use coordinator_types::prompb::{Label, WriteRequest};
use metric::U64Counter;
use prost::Message;
use twox_hash::XxHash64;

use crate::error::ForwardError;
use crate::options::ShadowOptions;

/// Number of buckets series are hashed into, fine enough for a fraction of
/// `0.0001` to select anything.
pub const SHADOW_BUCKETS: u64 = 10_000;

/// The hash used to place a series in a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashFunction {
    #[default]
    XxHash64,
    Murmur3,
}

impl FromStr for HashFunction {
    type Err = ForwardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "xxhash" => Ok(Self::XxHash64),
            "murmur3" => Ok(Self::Murmur3),
            _ => Err(ForwardError::UnknownHashFunction(s.to_string())),
        }
    }
}

impl Display for HashFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::XxHash64 => write!(f, "xxhash"),
            Self::Murmur3 => write!(f, "murmur3"),
        }
    }
}

impl HashFunction {
    pub fn hash(&self, data: &[u8]) -> Result<u64, ForwardError> {
        match self {
            Self::XxHash64 => Ok(XxHash64::oneshot(0, data)),
            // The first half of the 128 bit digest.
            Self::Murmur3 => murmur3::murmur3_x64_128(&mut Cursor::new(data), 0)
                .map(|h| h as u64)
                .map_err(ForwardError::Hash),
        }
    }
}

/// Write the `name=value,...` pseudo ID of `labels` into `buf`.
///
/// Labels usually arrive sorted by name, they are only sorted (in place) when
/// found out of order.
pub fn pseudo_id(labels: &mut [Label], buf: &mut Vec<u8>) {
    if !labels.is_sorted_by(|a, b| a.name <= b.name) {
        labels.sort_by(|a, b| a.name.cmp(&b.name));
    }

    buf.clear();
    for (i, label) in labels.iter().enumerate() {
        if i > 0 {
            buf.push(b',');
        }
        buf.extend_from_slice(&label.name);
        buf.push(b'=');
        buf.extend_from_slice(&label.value);
    }
}

/// Counters for the keep/drop decisions of the sampler.
#[derive(Debug, Clone)]
pub struct ShadowMetrics {
    pub keep: U64Counter,
    pub drop: U64Counter,
}

/// A validated shadow configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSampler {
    percent: f64,
    hash: HashFunction,
}

impl TryFrom<&ShadowOptions> for ShadowSampler {
    type Error = ForwardError;

    fn try_from(opts: &ShadowOptions) -> Result<Self, Self::Error> {
        if !(0.0..=1.0).contains(&opts.percent) {
            return Err(ForwardError::ShadowPercentOutOfRange(opts.percent));
        }
        Ok(Self {
            percent: opts.percent,
            hash: opts.hash.parse()?,
        })
    }
}

impl ShadowSampler {
    /// Highest bucket, inclusive, that is kept. `None` keeps nothing.
    fn threshold(&self) -> Option<u64> {
        if self.percent == 0.0 {
            return None;
        }
        // Truncation is intended, `percent` is within [0, 1].
        Some((self.percent * SHADOW_BUCKETS as f64) as u64)
    }

    /// Whether the series with the given pseudo ID is forwarded.
    pub fn keep(&self, pseudo_id: &[u8]) -> Result<bool, ForwardError> {
        let Some(threshold) = self.threshold() else {
            return Ok(false);
        };
        Ok(self.hash.hash(pseudo_id)? % SHADOW_BUCKETS <= threshold)
    }

    /// Select the kept series of `req`.
    pub fn sample(
        &self,
        req: &WriteRequest,
        metrics: &ShadowMetrics,
    ) -> Result<WriteRequest, ForwardError> {
        let mut shadow = WriteRequest::default();
        let mut labels = Vec::new();
        let mut id = Vec::new();
        for series in &req.timeseries {
            // Sort a copy, the request is shared with the local write.
            labels.clone_from(&series.labels);
            pseudo_id(&mut labels, &mut id);
            if self.keep(&id)? {
                metrics.keep.inc(1);
                shadow.timeseries.push(series.clone());
            } else {
                metrics.drop.inc(1);
            }
        }
        Ok(shadow)
    }
}

/// Build the snappy compressed body forwarded to a shadow target.
///
/// Fails without looking at the series when `opts` is invalid.
pub fn build_shadow_body(
    req: &WriteRequest,
    opts: &ShadowOptions,
    metrics: &ShadowMetrics,
) -> Result<Vec<u8>, ForwardError> {
    let sampler = ShadowSampler::try_from(opts)?;
    let shadow = sampler.sample(req, metrics)?;
    snap::raw::Encoder::new()
        .compress_vec(&shadow.encode_to_vec())
        .map_err(ForwardError::Compress)
}
