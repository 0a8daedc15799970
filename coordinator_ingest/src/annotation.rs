//! Series annotations, stored alongside a series to record its metric type.

use coordinator_types::prompb::MetricType;
use prost::Message;
use thiserror::Error;

use crate::series::{SeriesAttributes, SourceType};

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("graphite series cannot carry Prometheus metric type {0:?}")]
    GraphiteWithMetricType(MetricType),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SourceFormat {
    Prometheus = 0,
    Graphite = 1,
}

/// The annotation written with a series when metric types are stored.
#[derive(prost::Message, Clone, PartialEq)]
pub struct AnnotationPayload {
    #[prost(enumeration = "MetricType", tag = "1")]
    pub metric_type: i32,
    #[prost(bool, tag = "2")]
    pub handle_value_resets: bool,
    #[prost(enumeration = "SourceFormat", tag = "3")]
    pub source_format: i32,
}

impl TryFrom<&SeriesAttributes> for AnnotationPayload {
    type Error = AnnotationError;

    fn try_from(attrs: &SeriesAttributes) -> Result<Self, Self::Error> {
        match attrs.source {
            SourceType::Graphite if attrs.metric_type != MetricType::Unknown => {
                Err(AnnotationError::GraphiteWithMetricType(attrs.metric_type))
            }
            SourceType::Graphite => Ok(Self {
                metric_type: MetricType::Unknown as i32,
                handle_value_resets: false,
                source_format: SourceFormat::Graphite as i32,
            }),
            SourceType::Prometheus => Ok(Self {
                metric_type: attrs.metric_type as i32,
                handle_value_resets: attrs.handle_value_resets,
                source_format: SourceFormat::Prometheus as i32,
            }),
        }
    }
}

/// Encode the annotation for a series, `None` when it would be empty.
pub fn encode_annotation(attrs: &SeriesAttributes) -> Result<Option<Vec<u8>>, AnnotationError> {
    let encoded = AnnotationPayload::try_from(attrs)?.encode_to_vec();
    Ok((!encoded.is_empty()).then_some(encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_attributes_encode_to_nothing() {
        assert_eq!(Ok(None), encode_annotation(&SeriesAttributes::default()));
    }

    #[test]
    fn counter_annotation_decodes() {
        let attrs = SeriesAttributes {
            metric_type: MetricType::Counter,
            source: SourceType::Prometheus,
            handle_value_resets: true,
        };
        let encoded = encode_annotation(&attrs).unwrap().unwrap();
        let decoded = AnnotationPayload::decode(encoded.as_slice()).unwrap();
        assert_eq!(MetricType::Counter as i32, decoded.metric_type);
        assert!(decoded.handle_value_resets);
    }

    #[test]
    fn graphite_with_type_is_rejected() {
        let attrs = SeriesAttributes {
            metric_type: MetricType::Gauge,
            source: SourceType::Graphite,
            handle_value_resets: false,
        };
        assert_eq!(
            Err(AnnotationError::GraphiteWithMetricType(MetricType::Gauge)),
            encode_annotation(&attrs)
        );
    }
}
