//! The Prometheus remote write endpoint of a coordinator.
//!
//! A [`WriteHandler`] parses each request, hands it to the
//! [`Forwarder`](coordinator_forward::Forwarder) if one is configured, and
//! writes it to the storage engine. The response depends only on the local
//! write: a failed batch is rolled up by [`classify()`] into one status and
//! message.

pub mod classify;
pub mod handler;
mod metrics;
pub mod parse;
pub mod service;

pub use classify::{Classification, classify};
pub use handler::{HandlerError, WriteHandler};
pub use parse::{ParseError, ParsedRequest, parse_request};
pub use service::{REMOTE_WRITE_PATH, route_request, serve};
