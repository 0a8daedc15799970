//! Best effort replication of remote writes to other coordinators.
//!
//! A [`Forwarder`] sends each write it is given to every configured
//! [`ForwardTargetOptions`] target, either in full or, for shadow targets, as
//! a deterministic sample of its series. Forwards run in the background on a
//! [`ForwardContext`], bounded by a [`WorkerPool`] that drops work rather than
//! queue it, and are retried according to a [`RetryConfig`].

pub mod context;
pub mod dispatch;
pub mod error;
pub mod forwarder;
pub mod options;
pub mod pool;
pub mod retry;
pub mod shadow;

pub use context::ForwardContext;
pub use dispatch::{Dispatcher, ForwardPayload};
pub use error::{ForwardError, Result};
pub use forwarder::Forwarder;
pub use options::{ForwardTargetOptions, ForwardingOptions, ShadowOptions};
pub use pool::WorkerPool;
pub use retry::{Retrier, RetryConfig};
pub use shadow::HashFunction;
