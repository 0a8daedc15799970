//! Request headers understood by the remote write endpoint.
//!
//! Every header that changes how a write is processed carries the
//! [`COORDINATOR_HEADER_PREFIX`], which is what lets a forwarding coordinator
//! replay them verbatim to a downstream coordinator.

/// Prefix shared by all headers that alter coordinator write behaviour.
pub const COORDINATOR_HEADER_PREFIX: &str = "coordinator-";

/// Selects the metrics type (`unaggregated` or `aggregated`) of the write.
pub const METRICS_TYPE_HEADER: &str = "coordinator-metrics-type";

/// Storage policy override, e.g. `1m:48h`, used with an aggregated metrics type.
pub const METRICS_STORAGE_POLICY_HEADER: &str = "coordinator-storage-policy";

/// Selects the write type, see [`DEFAULT_WRITE_TYPE`] and [`AGGREGATE_WRITE_TYPE`].
pub const WRITE_TYPE_HEADER: &str = "coordinator-write-type";

/// JSON encoded tag mapping directive applied to every series in the write.
pub const MAP_TAGS_BY_JSON_HEADER: &str = "coordinator-map-tags-json";

/// Overrides the Prometheus metric type of every series in the write.
pub const PROM_TYPE_HEADER: &str = "coordinator-prom-type";

/// Write type that leaves the default write behaviour untouched.
pub const DEFAULT_WRITE_TYPE: &str = "default";

/// Write type that forces the write through the aggregation path only.
pub const AGGREGATE_WRITE_TYPE: &str = "aggregate";

/// Returns true if the header name is one that must be forwarded downstream.
///
/// Header names are case-insensitive, the comparison ignores ASCII case.
pub fn is_coordinator_header(name: &str) -> bool {
    name.len() >= COORDINATOR_HEADER_PREFIX.len()
        && name.as_bytes()[..COORDINATOR_HEADER_PREFIX.len()]
            .eq_ignore_ascii_case(COORDINATOR_HEADER_PREFIX.as_bytes())
}
