//! Shared types for the coordinator remote write path.
//!
//! This crate holds the Prometheus remote write wire model, the names of the
//! request headers that alter write behaviour, and the per-request write
//! options derived from those headers.

pub mod headers;
pub mod prompb;
pub mod tag_mapping;
pub mod write;
