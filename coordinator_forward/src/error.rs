use std::time::Duration;

use thiserror::Error;

/// Why a forward to a single target failed.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("forwarding shadow percent out of range [0,1]: {0}")]
    ShadowPercentOutOfRange(f64),

    #[error("unknown hash function: {0}")]
    UnknownHashFunction(String),

    #[error("failed to hash series: {0}")]
    Hash(#[source] std::io::Error),

    #[error("failed to compress forwarding shadow request: {0}")]
    Compress(#[source] snap::Error),

    #[error("invalid forward method '{method}': {source}")]
    InvalidMethod {
        method: String,
        #[source]
        source: http::method::InvalidMethod,
    },

    #[error("invalid forward header '{name}'")]
    InvalidHeader { name: String },

    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("expected status code 2XX: actual={status}, method={method}, url={url}, resp={body}")]
    UnexpectedStatus {
        status: u16,
        method: String,
        url: String,
        body: String,
    },

    #[error("forward {method} {url} timed out after {timeout:?}")]
    Timeout {
        method: String,
        url: String,
        timeout: Duration,
    },

    #[error("forwarding shut down")]
    Shutdown,
}

pub type Result<T, E = ForwardError> = std::result::Result<T, E>;
