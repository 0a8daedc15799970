//! Errors produced by the storage engine while writing a batch.

use std::fmt::Display;

use thiserror::Error;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A single failure from the storage engine.
///
/// Errors may wrap one another, e.g. an invalid parameter error raised
/// because a resource limit was hit. The `is_*` predicates look through the
/// whole [`source`](std::error::Error::source) chain, so such an error is
/// classified by every kind it carries.
#[derive(Debug, Error)]
pub enum WriteError {
    /// A limit was hit; the caller should back off and retry later.
    #[error("{0}")]
    ResourceExhausted(#[source] BoxedError),

    /// The write can never succeed as sent.
    #[error("{0}")]
    BadRequest(#[source] BoxedError),

    /// A parameter of the write was invalid.
    #[error("{0}")]
    InvalidParams(#[source] BoxedError),

    /// Anything else, usually a fault on the server side.
    #[error("{0}")]
    Other(#[source] BoxedError),
}

impl WriteError {
    pub fn resource_exhausted(err: impl Into<BoxedError>) -> Self {
        Self::ResourceExhausted(err.into())
    }

    pub fn bad_request(err: impl Into<BoxedError>) -> Self {
        Self::BadRequest(err.into())
    }

    pub fn invalid_params(err: impl Into<BoxedError>) -> Self {
        Self::InvalidParams(err.into())
    }

    pub fn other(err: impl Into<BoxedError>) -> Self {
        Self::Other(err.into())
    }

    pub fn is_resource_exhausted(&self) -> bool {
        chain_contains(self, |e| matches!(e, Self::ResourceExhausted(_)))
    }

    pub fn is_bad_request(&self) -> bool {
        chain_contains(self, |e| matches!(e, Self::BadRequest(_)))
    }

    pub fn is_invalid_params(&self) -> bool {
        chain_contains(self, |e| matches!(e, Self::InvalidParams(_)))
    }
}

fn chain_contains(
    err: &(dyn std::error::Error + 'static),
    matches: impl Fn(&WriteError) -> bool,
) -> bool {
    let mut next = Some(err);
    while let Some(err) = next {
        if err.downcast_ref::<WriteError>().is_some_and(&matches) {
            return true;
        }
        next = err.source();
    }
    false
}

/// The outcome of a failed batch write: one error per failed series or
/// per failed sub-batch, in no particular order.
///
/// A `BatchError` is never empty and is not modified once built.
#[derive(Debug)]
pub struct BatchError {
    errors: Vec<WriteError>,
}

impl BatchError {
    /// Build a `BatchError`, returning `None` if there were no errors.
    pub fn from_errors(errors: Vec<WriteError>) -> Option<Self> {
        (!errors.is_empty()).then_some(Self { errors })
    }

    pub fn errors(&self) -> &[WriteError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl From<WriteError> for BatchError {
    fn from(err: WriteError) -> Self {
        Self { errors: vec![err] }
    }
}

impl Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.errors.as_slice() {
            [only] => write!(f, "{only}"),
            [.., last] => write!(f, "{} write errors, last: {last}", self.errors.len()),
            [] => write!(f, "no write errors"),
        }
    }
}

impl std::error::Error for BatchError {}
