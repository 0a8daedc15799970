//! Roll up of a failed batch write into a single response.

use std::fmt::Display;

use coordinator_ingest::error::{BatchError, WriteError};
use hyper::StatusCode;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCounts {
    pub resource_exhausted: usize,
    pub bad_request: usize,
    pub regular: usize,
}

/// The status and diagnostics derived from a [`BatchError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: StatusCode,
    pub counts: ErrorCounts,
    pub last_regular: Option<String>,
    /// Last bad request, invalid parameters or resource exhausted error.
    pub last_bad_request: Option<String>,
}

impl Classification {
    /// The message returned to the caller.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(last) = &self.last_regular {
            write!(
                f,
                "retryable_errors: count={}, last={last}",
                self.counts.regular
            )?;
        }
        if let Some(last) = &self.last_bad_request {
            if self.last_regular.is_some() {
                write!(f, ", ")?;
            }
            write!(
                f,
                "bad_request_errors: count={}, last={last}",
                self.counts.bad_request
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    ResourceExhausted,
    BadRequest,
    Regular,
}

impl Bucket {
    fn of(err: &WriteError) -> Self {
        if err.is_resource_exhausted() {
            Self::ResourceExhausted
        } else if err.is_bad_request() || err.is_invalid_params() {
            Self::BadRequest
        } else {
            Self::Regular
        }
    }
}

/// Classify `err` into a response status.
///
/// A batch where every error is a bad request is a 400. Otherwise any
/// resource exhausted error makes it a 429, and anything else is a 500.
/// Resource exhausted errors are reported in the bad request part of the
/// message but are not counted there.
pub fn classify(err: &BatchError) -> Classification {
    let mut counts = ErrorCounts::default();
    let mut last_regular = None;
    let mut last_bad_request = None;

    for e in err.errors() {
        match Bucket::of(e) {
            Bucket::ResourceExhausted => {
                counts.resource_exhausted += 1;
                last_bad_request = Some(e.to_string());
            }
            Bucket::BadRequest => {
                counts.bad_request += 1;
                last_bad_request = Some(e.to_string());
            }
            Bucket::Regular => {
                counts.regular += 1;
                last_regular = Some(e.to_string());
            }
        }
    }

    let status = if counts.bad_request == err.len() {
        StatusCode::BAD_REQUEST
    } else if counts.resource_exhausted > 0 {
        StatusCode::TOO_MANY_REQUESTS
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    Classification {
        status,
        counts,
        last_regular,
        last_bad_request,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn batch(errors: Vec<WriteError>) -> BatchError {
        BatchError::from_errors(errors).unwrap()
    }

    #[test]
    fn all_bad_request() {
        let c = classify(&batch(vec![
            WriteError::bad_request("bad tag"),
            WriteError::invalid_params("bad param"),
        ]));
        assert_eq!(StatusCode::BAD_REQUEST, c.status);
        assert_eq!(
            ErrorCounts {
                resource_exhausted: 0,
                bad_request: 2,
                regular: 0,
            },
            c.counts
        );
        assert_eq!("bad_request_errors: count=2, last=bad param", c.message());
    }

    #[test]
    fn resource_exhausted_wins_over_regular() {
        let c = classify(&batch(vec![
            WriteError::other("disk on fire"),
            WriteError::resource_exhausted("too many series"),
            WriteError::bad_request("bad tag"),
        ]));
        assert_eq!(StatusCode::TOO_MANY_REQUESTS, c.status);
        assert_eq!(
            "retryable_errors: count=1, last=disk on fire, \
            bad_request_errors: count=1, last=too many series",
            c.message()
        );
    }

    #[test]
    fn only_resource_exhausted() {
        let c = classify(&batch(vec![WriteError::resource_exhausted("slow down")]));
        assert_eq!(StatusCode::TOO_MANY_REQUESTS, c.status);
        assert_eq!("bad_request_errors: count=0, last=slow down", c.message());
    }

    #[test]
    fn regular_and_bad_request_is_server_error() {
        let c = classify(&batch(vec![
            WriteError::bad_request("bad tag"),
            WriteError::other("timeout"),
        ]));
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, c.status);
        assert_eq!(1, c.counts.regular);
        assert_eq!(1, c.counts.bad_request);
    }

    #[test]
    fn wrapped_errors_classify_by_any_wrapper() {
        // An invalid params error caused by a resource limit is resource
        // exhausted first.
        let inner = WriteError::resource_exhausted("limit");
        let c = classify(&batch(vec![WriteError::invalid_params(inner)]));
        assert_eq!(StatusCode::TOO_MANY_REQUESTS, c.status);
        assert_eq!(1, c.counts.resource_exhausted);
        assert_eq!(0, c.counts.bad_request);

        let inner = WriteError::bad_request("bad tag");
        let c = classify(&batch(vec![WriteError::other(inner)]));
        assert_eq!(StatusCode::BAD_REQUEST, c.status);
    }
}
