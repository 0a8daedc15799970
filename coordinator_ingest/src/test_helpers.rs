//! An in-memory [`DownsamplerAndWriter`] for tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use coordinator_types::write::WriteOptions;
use parking_lot::Mutex;

use crate::DownsamplerAndWriter;
use crate::error::{BatchError, WriteError};
use crate::iter::{Advance, SeriesIter};
use crate::series::{Datapoint, Metadata, SeriesAttributes, Tags};

/// A series as it reached the storage engine.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenSeries {
    pub tags: Tags,
    pub datapoints: Vec<Datapoint>,
    pub attributes: SeriesAttributes,
    pub annotation: Option<Vec<u8>>,
    pub metadata: Metadata,
}

/// One call to [`DownsamplerAndWriter::write_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub series: Vec<WrittenSeries>,
    pub opts: WriteOptions,
}

/// Records every write, optionally failing with queued errors.
#[derive(Debug, Default)]
pub struct RecordingWriter {
    calls: Mutex<Vec<WriteCall>>,
    errors: Mutex<VecDeque<Vec<WriteError>>>,
    metadata: Option<Metadata>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `metadata` to every series as it is written.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Fail the next write with `errors`, after recording its series.
    pub fn push_errors(&self, errors: Vec<WriteError>) {
        self.errors.lock().push_back(errors);
    }

    pub fn calls(&self) -> Vec<WriteCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DownsamplerAndWriter for RecordingWriter {
    async fn write_batch(
        &self,
        iter: &mut dyn SeriesIter,
        opts: &WriteOptions,
    ) -> Result<(), BatchError> {
        let mut series = vec![];
        let mut errors = vec![];
        loop {
            match iter.advance() {
                Advance::Ready => {}
                Advance::Exhausted => break,
                Advance::Failed(e) => {
                    errors.push(WriteError::other(e));
                    break;
                }
            }
            if let Some(metadata) = self.metadata {
                iter.set_current_metadata(metadata);
            }
            let value = iter.current();
            series.push(WrittenSeries {
                tags: value.tags.clone(),
                datapoints: value.datapoints.to_vec(),
                attributes: value.attributes,
                annotation: value.annotation.map(<[u8]>::to_vec),
                metadata: value.metadata,
            });
        }

        self.calls.lock().push(WriteCall {
            series,
            opts: opts.clone(),
        });

        if let Some(queued) = self.errors.lock().pop_front() {
            errors.extend(queued);
        }
        match BatchError::from_errors(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
