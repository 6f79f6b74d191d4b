//! Stream key - identifies one execution's event history

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Separator between workflow and trigger ids in rendered keys
const SEPARATOR: char = ':';

/// Key validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{field} must not contain ':': {value}")]
    Separator { field: &'static str, value: String },
}

/// `(workflow_id, trigger_id)` pair
///
/// Owns two logical sub-resources in the event log: the sequence counter and
/// the ordered event collection. Both share one retention window.
///
/// Deserialization validates both ids like [`StreamKey::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawStreamKey")]
pub struct StreamKey {
    workflow_id: String,
    trigger_id: String,
}

impl StreamKey {
    /// Create a validated key
    pub fn new(
        workflow_id: impl Into<String>,
        trigger_id: impl Into<String>,
    ) -> Result<Self, KeyError> {
        let workflow_id = workflow_id.into();
        let trigger_id = trigger_id.into();
        validate_id("workflow_id", &workflow_id)?;
        validate_id("trigger_id", &trigger_id)?;
        Ok(Self {
            workflow_id,
            trigger_id,
        })
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn trigger_id(&self) -> &str {
        &self.trigger_id
    }
}

/// Unvalidated wire form
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStreamKey {
    workflow_id: String,
    trigger_id: String,
}

impl TryFrom<RawStreamKey> for StreamKey {
    type Error = KeyError;

    fn try_from(raw: RawStreamKey) -> Result<Self, Self::Error> {
        StreamKey::new(raw.workflow_id, raw.trigger_id)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.workflow_id, SEPARATOR, self.trigger_id)
    }
}

/// Validate a workflow or trigger id
pub fn validate_id(field: &'static str, value: &str) -> Result<(), KeyError> {
    if value.is_empty() {
        return Err(KeyError::Empty(field));
    }
    if value.contains(SEPARATOR) {
        return Err(KeyError::Separator {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
