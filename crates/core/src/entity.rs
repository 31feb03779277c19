//! Store entity processing status.

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, TimestampMs};

/// Entity reached the end of processing.
pub const ENTITY_STATUS_COMPLETED: &str = "completed";

/// Entity processing failed.
pub const ENTITY_STATUS_FAILED: &str = "failed";

/// Status report for one store entity.
///
/// Any fields beyond the three required ones are kept verbatim in
/// [`details`](Self::details).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStatus {
    pub entity_id: EntityId,
    pub status: String,
    pub timestamp: TimestampMs,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl EntityStatus {
    pub fn new(entity_id: EntityId, status: impl Into<String>, timestamp: TimestampMs) -> Self {
        Self {
            entity_id,
            status: status.into(),
            timestamp,
            details: serde_json::Map::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == ENTITY_STATUS_FAILED
    }
}
