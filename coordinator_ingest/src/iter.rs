//! Iteration over the normalized series of a write.

use coordinator_types::prompb;

use crate::annotation::{AnnotationError, encode_annotation};
use crate::series::{
    Datapoint, IdScheme, Metadata, SeriesAttributes, SeriesAttributesError, SourceType,
    TagOptions, Tags, TimeUnit, datapoints_from_samples,
};

static EMPTY_TAGS: Tags = Tags::empty();

/// The result of advancing a [`SeriesIter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The iterator is positioned on the next series.
    Ready,
    /// Every series has been visited.
    Exhausted,
    /// The iteration failed; it keeps failing until [`SeriesIter::reset`].
    Failed(AnnotationError),
}

/// The series the iterator is positioned on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterValue<'a> {
    pub tags: &'a Tags,
    pub datapoints: &'a [Datapoint],
    pub attributes: SeriesAttributes,
    pub unit: TimeUnit,
    pub annotation: Option<&'a [u8]>,
    pub metadata: Metadata,
}

impl IterValue<'static> {
    /// What [`SeriesIter::current`] yields when not positioned on a series.
    pub fn empty() -> Self {
        Self {
            tags: &EMPTY_TAGS,
            datapoints: &[],
            attributes: SeriesAttributes::default(),
            unit: TimeUnit::Millisecond,
            annotation: None,
            metadata: Metadata::default(),
        }
    }
}

/// A restartable, single pass iterator over the series of a write, as
/// consumed by a [`DownsamplerAndWriter`](crate::DownsamplerAndWriter).
pub trait SeriesIter: std::fmt::Debug + Send {
    /// Move to the next series.
    fn advance(&mut self) -> Advance;

    /// The current series, or [`IterValue::empty`] before the first
    /// [`advance`](Self::advance) and after exhaustion.
    fn current(&self) -> IterValue<'_>;

    /// Rewind to before the first series and clear any failure.
    fn reset(&mut self);

    /// Attach metadata to the current series only.
    fn set_current_metadata(&mut self, metadata: Metadata);
}

/// [`SeriesIter`] over a decoded remote write request.
///
/// Tags, datapoints and attributes for every series are built once, up front,
/// so that a [`reset`](SeriesIter::reset) to retry a write does not redo
/// that work.
#[derive(Debug)]
pub struct PromSeriesIter {
    /// Position of the current series, `None` before the first advance.
    idx: Option<usize>,
    err: Option<AnnotationError>,
    attributes: Vec<SeriesAttributes>,
    tags: Vec<Tags>,
    datapoints: Vec<Vec<Datapoint>>,
    metadatas: Vec<Metadata>,
    annotation: Option<Vec<u8>>,
    store_metrics_type: bool,
}

impl PromSeriesIter {
    pub fn new(
        timeseries: &[prompb::TimeSeries],
        tag_opts: TagOptions,
        store_metrics_type: bool,
    ) -> Result<Self, SeriesAttributesError> {
        let mut tags = Vec::with_capacity(timeseries.len());
        let mut datapoints = Vec::with_capacity(timeseries.len());
        let mut attributes = Vec::with_capacity(timeseries.len());

        let graphite_tag_opts = tag_opts.with_id_scheme(IdScheme::Graphite);
        for series in timeseries {
            let attrs = SeriesAttributes::try_from(series)?;
            let opts = match attrs.source {
                SourceType::Graphite => graphite_tag_opts,
                SourceType::Prometheus => tag_opts,
            };
            attributes.push(attrs);
            tags.push(Tags::from_labels(&series.labels, opts));
            datapoints.push(datapoints_from_samples(&series.samples));
        }

        Ok(Self {
            idx: None,
            err: None,
            attributes,
            tags,
            datapoints,
            metadatas: Vec::new(),
            annotation: None,
            store_metrics_type,
        })
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// The failure that stopped the iteration, if any.
    pub fn error(&self) -> Option<AnnotationError> {
        self.err
    }

    fn position(&self) -> Option<usize> {
        self.idx.filter(|&idx| idx < self.tags.len())
    }
}

impl SeriesIter for PromSeriesIter {
    fn advance(&mut self) -> Advance {
        if let Some(err) = self.err {
            return Advance::Failed(err);
        }

        let next = self.idx.map_or(0, |idx| idx.saturating_add(1));
        // Stop counting once exhausted so repeated calls stay exhausted.
        self.idx = Some(next.min(self.tags.len()));
        if next >= self.tags.len() {
            return Advance::Exhausted;
        }

        if !self.store_metrics_type {
            return Advance::Ready;
        }

        match encode_annotation(&self.attributes[next]) {
            Ok(annotation) => {
                self.annotation = annotation;
                Advance::Ready
            }
            Err(err) => {
                self.err = Some(err);
                Advance::Failed(err)
            }
        }
    }

    fn current(&self) -> IterValue<'_> {
        let Some(idx) = self.position() else {
            return IterValue::empty();
        };
        IterValue {
            tags: &self.tags[idx],
            datapoints: &self.datapoints[idx],
            attributes: self.attributes[idx],
            unit: TimeUnit::Millisecond,
            annotation: self.annotation.as_deref(),
            metadata: self.metadatas.get(idx).copied().unwrap_or_default(),
        }
    }

    fn reset(&mut self) {
        self.idx = None;
        self.err = None;
        self.annotation = None;
    }

    fn set_current_metadata(&mut self, metadata: Metadata) {
        let Some(idx) = self.position() else {
            return;
        };
        if self.metadatas.is_empty() {
            self.metadatas = vec![Metadata::default(); self.tags.len()];
        }
        self.metadatas[idx] = metadata;
    }
}

#[cfg(test)]
mod tests {
    use coordinator_types::prompb::{Label, MetricType, Sample, Source, TimeSeries};
    use pretty_assertions::assert_eq;

    use super::*;

    fn series(name: &str, tp: MetricType) -> TimeSeries {
        TimeSeries::new(
            vec![Label::new("__name__", name), Label::new("host", "a")],
            vec![Sample {
                value: 1.0,
                timestamp: 1_000,
            }],
        )
        .with_type(tp)
    }

    fn names(iter: &mut PromSeriesIter) -> Vec<Vec<u8>> {
        let mut names = vec![];
        while iter.advance() == Advance::Ready {
            names.push(iter.current().tags.get(b"__name__").unwrap().to_vec());
        }
        names
    }

    #[test]
    fn visits_series_in_order_once() {
        let input = vec![
            series("a", MetricType::Gauge),
            series("b", MetricType::Gauge),
            series("c", MetricType::Gauge),
        ];
        let mut iter = PromSeriesIter::new(&input, TagOptions::default(), false).unwrap();
        assert_eq!(IterValue::empty(), iter.current());
        assert_eq!(
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()],
            names(&mut iter)
        );
        assert_eq!(Advance::Exhausted, iter.advance());
        assert_eq!(IterValue::empty(), iter.current());
    }

    #[test]
    fn reset_restores_initial_state() {
        let input = vec![series("a", MetricType::Gauge), series("b", MetricType::Gauge)];
        let mut iter = PromSeriesIter::new(&input, TagOptions::default(), true).unwrap();
        let tags_before = iter.tags.clone();

        assert_eq!(Advance::Ready, iter.advance());
        iter.reset();

        assert_eq!(None, iter.idx);
        assert_eq!(IterValue::empty(), iter.current());
        assert_eq!(tags_before, iter.tags);
        assert_eq!(vec![b"a".to_vec(), b"b".to_vec()], names(&mut iter));
    }

    #[test]
    fn metadata_attaches_to_current_only() {
        let input = vec![series("a", MetricType::Gauge), series("b", MetricType::Gauge)];
        let mut iter = PromSeriesIter::new(&input, TagOptions::default(), false).unwrap();

        // before the first advance there is nothing to attach to
        iter.set_current_metadata(Metadata {
            drop_unaggregated: true,
        });
        assert!(iter.metadatas.is_empty());

        iter.advance();
        iter.advance();
        iter.set_current_metadata(Metadata {
            drop_unaggregated: true,
        });
        assert!(iter.current().metadata.drop_unaggregated);

        iter.reset();
        iter.advance();
        assert!(!iter.current().metadata.drop_unaggregated);
    }

    #[test]
    fn annotation_failure_is_sticky_until_reset() {
        let input = vec![
            series("a", MetricType::Counter),
            series("b", MetricType::Gauge).with_source(Source::Graphite),
            series("c", MetricType::Gauge),
        ];
        let mut iter = PromSeriesIter::new(&input, TagOptions::default(), true).unwrap();

        assert_eq!(Advance::Ready, iter.advance());
        assert!(iter.current().annotation.is_some());
        let failed = Advance::Failed(AnnotationError::GraphiteWithMetricType(MetricType::Gauge));
        assert_eq!(failed, iter.advance());
        assert_eq!(failed, iter.advance());
        assert!(iter.error().is_some());

        iter.reset();
        assert_eq!(None, iter.error());
        assert_eq!(Advance::Ready, iter.advance());
    }

    #[test]
    fn graphite_series_use_graphite_ids() {
        let input = vec![
            TimeSeries::new(
                vec![Label::new("__g0__", "servers"), Label::new("__g1__", "cpu")],
                vec![],
            )
            .with_source(Source::Graphite),
        ];
        let mut iter = PromSeriesIter::new(&input, TagOptions::default(), false).unwrap();
        iter.advance();
        assert_eq!(b"servers.cpu".to_vec(), iter.current().tags.id());
        assert_eq!(TimeUnit::Millisecond, iter.current().unit);
    }

    #[test]
    fn undefined_metric_type_fails_construction() {
        let mut bad = series("a", MetricType::Gauge);
        bad.r#type = 12;
        assert_eq!(
            SeriesAttributesError::InvalidMetricType(12),
            PromSeriesIter::new(&[bad], TagOptions::default(), false).unwrap_err()
        );
    }
}
