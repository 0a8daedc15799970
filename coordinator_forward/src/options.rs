//! Configuration of the downstream targets writes are forwarded to.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;
use crate::shadow::HashFunction;

/// Forward timeout used when none is configured.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(15);

/// Forward only a deterministic fraction of the series of each write.
///
/// Both fields are checked when a shadow body is built, so a bad value fails
/// the forwards to that target rather than the whole configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowOptions {
    /// Fraction of series to forward, within `[0, 1]`.
    pub percent: f64,
    /// Name of a [`HashFunction`], the default one when empty.
    #[serde(default)]
    pub hash: String,
}

impl ShadowOptions {
    pub fn new(percent: f64, hash: HashFunction) -> Self {
        Self {
            percent,
            hash: hash.to_string(),
        }
    }
}

/// One downstream coordinator to forward writes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardTargetOptions {
    pub url: String,
    /// HTTP method, `POST` when empty.
    #[serde(default)]
    pub method: String,
    /// Static headers added to every forwarded request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Make a single attempt, ignoring the retry configuration.
    #[serde(default)]
    pub no_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow: Option<ShadowOptions>,
}

impl ForwardTargetOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: String::new(),
            headers: BTreeMap::new(),
            no_retry: false,
            shadow: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_no_retry(mut self) -> Self {
        self.no_retry = true;
        self
    }

    pub fn with_shadow(mut self, shadow: ShadowOptions) -> Self {
        self.shadow = Some(shadow);
        self
    }

    pub fn method(&self) -> &str {
        if self.method.is_empty() {
            "POST"
        } else {
            &self.method
        }
    }
}

/// Everything that controls forwarding for a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardingOptions {
    #[serde(default)]
    pub targets: Vec<ForwardTargetOptions>,
    /// Maximum number of forwards in flight, unbounded when zero.
    #[serde(default)]
    pub max_concurrency: usize,
    /// Deadline of a single forward attempt.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timeout() -> Duration {
    DEFAULT_FORWARD_TIMEOUT
}

impl Default for ForwardingOptions {
    fn default() -> Self {
        Self {
            targets: vec![],
            max_concurrency: 0,
            timeout: DEFAULT_FORWARD_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn deserialize_targets() {
        let opts: ForwardingOptions = serde_json::from_str(
            r#"{
                "targets": [
                    {"url": "http://a:7201/api/v1/prom/remote/write"},
                    {
                        "url": "http://b:7201/api/v1/prom/remote/write",
                        "method": "PUT",
                        "headers": {"x-env": "shadow"},
                        "no_retry": true,
                        "shadow": {"percent": 0.25, "hash": "murmur3"}
                    }
                ],
                "max_concurrency": 4,
                "timeout": "3s"
            }"#,
        )
        .unwrap();

        assert_eq!(2, opts.targets.len());
        assert_eq!("POST", opts.targets[0].method());
        assert_eq!(None, opts.targets[0].shadow);
        assert_eq!("PUT", opts.targets[1].method());
        assert!(opts.targets[1].no_retry);
        assert_eq!(
            Some(ShadowOptions::new(0.25, HashFunction::Murmur3)),
            opts.targets[1].shadow
        );
        assert_eq!(4, opts.max_concurrency);
        assert_eq!(Duration::from_secs(3), opts.timeout);
        assert_eq!(RetryConfig::default(), opts.retry);
    }

    #[test]
    fn defaults() {
        let opts: ForwardingOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(ForwardingOptions::default(), opts);
        assert_eq!(DEFAULT_FORWARD_TIMEOUT, opts.timeout);
    }
}
