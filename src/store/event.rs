//! Watch events consumed from the cluster-state watcher.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::model::{ObjectKey, ObjectKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOp {
    Add,
    Update,
    Delete,
}

/// One add/update/delete for a single object.
///
/// Delivery is at-least-once; the store treats Add and Update alike and
/// ignores Deletes for absent keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: ObjectKind,
    pub op: EventOp,
    pub key: ObjectKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl WatchEvent {
    pub fn add(kind: ObjectKind, key: ObjectKey, payload: serde_json::Value) -> Self {
        Self {
            kind,
            op: EventOp::Add,
            key,
            payload: Some(payload),
        }
    }

    pub fn update(kind: ObjectKind, key: ObjectKey, payload: serde_json::Value) -> Self {
        Self {
            kind,
            op: EventOp::Update,
            key,
            payload: Some(payload),
        }
    }

    pub fn delete(kind: ObjectKind, key: ObjectKey) -> Self {
        Self {
            kind,
            op: EventOp::Delete,
            key,
            payload: None,
        }
    }

    /// Decodes the payload into a typed spec.
    pub(crate) fn decode<T: DeserializeOwned>(&mut self) -> Result<T> {
        let payload = self
            .payload
            .take()
            .ok_or_else(|| RouterError::malformed(self.kind, &self.key, "missing payload"))?;
        serde_json::from_value(payload)
            .map_err(|e| RouterError::malformed(self.kind, &self.key, e.to_string()))
    }
}

/// What an applied event changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Deleted,
    /// Duplicate delivery or delete of an absent key.
    Unchanged,
}

/// Parses newline-delimited JSON events. Blank lines are skipped; each
/// item carries its 1-based line number.
pub fn parse_event_lines(
    input: &str,
) -> impl Iterator<Item = (usize, serde_json::Result<WatchEvent>)> + '_ {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| (i + 1, serde_json::from_str(line)))
}
