//! Tag mapping directives sent as JSON in the
//! [`MAP_TAGS_BY_JSON_HEADER`](crate::headers::MAP_TAGS_BY_JSON_HEADER).
//!
//! ```json
//! {"tagMappers": [{"write": {"tag": "env", "value": "prod"}}]}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prompb::{Label, WriteRequest};

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TagMappingError {
    #[error("tag mapper must specify exactly one operation, found {0}")]
    OperationCount(usize),

    #[error("tag mapper operation requires a non-empty tag name")]
    EmptyTagName,
}

/// A list of tag mappers, applied in order to every series of a write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapTagsOptions {
    #[serde(default)]
    pub tag_mappers: Vec<TagMapper>,
}

/// A single mapping step, exactly one of the operations must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagMapper {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<WriteOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop: Option<DropOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<ReplaceOp>,
}

/// Set `tag` to `value` on every series, adding the tag where missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOp {
    pub tag: String,
    pub value: String,
}

/// Remove `tag` from every series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropOp {
    pub tag: String,
}

/// Rewrite the value of `tag` to `new_value` where it currently equals `old_value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceOp {
    pub tag: String,
    pub old_value: String,
    pub new_value: String,
}

impl TagMapper {
    fn validate(&self) -> Result<(), TagMappingError> {
        let ops = [
            self.write.as_ref().map(|op| op.tag.as_str()),
            self.drop.as_ref().map(|op| op.tag.as_str()),
            self.replace.as_ref().map(|op| op.tag.as_str()),
        ];
        let set = ops.iter().flatten().count();
        if set != 1 {
            return Err(TagMappingError::OperationCount(set));
        }
        if ops.iter().flatten().any(|tag| tag.is_empty()) {
            return Err(TagMappingError::EmptyTagName);
        }
        Ok(())
    }

    fn apply(&self, labels: &mut Vec<Label>) {
        if let Some(op) = &self.write {
            let name = op.tag.as_bytes();
            match labels.iter_mut().find(|l| l.name == name) {
                Some(label) => label.value = op.value.as_bytes().to_vec(),
                None => labels.push(Label::new(name, op.value.as_bytes())),
            }
        } else if let Some(op) = &self.drop {
            labels.retain(|l| l.name != op.tag.as_bytes());
        } else if let Some(op) = &self.replace {
            for label in labels
                .iter_mut()
                .filter(|l| l.name == op.tag.as_bytes() && l.value == op.old_value.as_bytes())
            {
                label.value = op.new_value.as_bytes().to_vec();
            }
        }
    }
}

impl MapTagsOptions {
    /// Validate every mapper, then apply them in order to all series of `req`.
    ///
    /// Nothing is modified if any mapper is invalid.
    pub fn apply(&self, req: &mut WriteRequest) -> Result<(), TagMappingError> {
        for mapper in &self.tag_mappers {
            mapper.validate()?;
        }
        for mapper in &self.tag_mappers {
            for series in &mut req.timeseries {
                mapper.apply(&mut series.labels);
            }
        }
        Ok(())
    }
}
