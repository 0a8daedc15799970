//! The contract between remote write ingestion and the storage engine.
//!
//! A decoded write is handed to a [`DownsamplerAndWriter`] as a
//! [`SeriesIter`](iter::SeriesIter) of normalized series plus the
//! [`WriteOptions`] derived from the request. Every failure the engine hits
//! is collected into one [`BatchError`](error::BatchError), which the caller
//! rolls up into a single response.

pub mod annotation;
pub mod error;
pub mod iter;
pub mod series;
pub mod test_helpers;

use std::fmt::Debug;

use async_trait::async_trait;
use coordinator_types::write::WriteOptions;

use crate::error::BatchError;
use crate::iter::SeriesIter;

/// The storage and downsampling engine, as seen by the write path.
#[async_trait]
pub trait DownsamplerAndWriter: Debug + Send + Sync + 'static {
    /// Write every series of `iter`, applying `opts`.
    ///
    /// Implementations may call
    /// [`set_current_metadata`](SeriesIter::set_current_metadata) while
    /// iterating, and may [`reset`](SeriesIter::reset) the iterator to retry.
    async fn write_batch(
        &self,
        iter: &mut dyn SeriesIter,
        opts: &WriteOptions,
    ) -> Result<(), BatchError>;
}
