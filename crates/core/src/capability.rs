//! Worker capability snapshots.
//!
//! Workers periodically publish which task types they can execute and
//! how many execution slots are currently free. The latest message for a
//! worker replaces any earlier one wholesale.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::TimestampMs;

/// A worker's self-reported capabilities at a point in time.
///
/// Field names on the wire differ from the Rust names: `idle_count`
/// maps to [`idle_slots`](Self::idle_slots) and `timestamp` maps to
/// [`observed_at`](Self::observed_at).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub worker_id: String,
    /// Task-type names this worker can execute.
    pub capabilities: BTreeSet<String>,
    /// Concurrently available execution slots. Zero means busy.
    #[serde(rename = "idle_count")]
    pub idle_slots: u32,
    #[serde(rename = "timestamp")]
    pub observed_at: TimestampMs,
}

impl CapabilitySnapshot {
    pub fn new<I, S>(worker_id: impl Into<String>, capabilities: I, idle_slots: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            worker_id: worker_id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            idle_slots,
            observed_at: 0,
        }
    }

    pub fn observed_at(mut self, ts: TimestampMs) -> Self {
        self.observed_at = ts;
        self
    }

    /// Whether this worker advertises `task_type`, regardless of load.
    pub fn supports(&self, task_type: &str) -> bool {
        self.capabilities.contains(task_type)
    }

    /// Whether this worker can accept a `task_type` job right now.
    pub fn can_accept(&self, task_type: &str) -> bool {
        self.idle_slots > 0 && self.supports(task_type)
    }
}

/// Sum idle slots per task type across all given workers.
///
/// A worker advertising several task types contributes its idle slots to
/// each of them. Task types advertised only by busy workers appear with
/// a count of zero.
pub fn idle_slots_by_task_type<'a, I>(workers: I) -> BTreeMap<String, u32>
where
    I: IntoIterator<Item = &'a CapabilitySnapshot>,
{
    let mut counts = BTreeMap::new();
    for worker in workers {
        for cap in &worker.capabilities {
            *counts.entry(cap.clone()).or_insert(0) += worker.idle_slots;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_wire_field_names() {
        let json = r#"{"worker_id":"w1","capabilities":["clip_embedding","hash"],"idle_count":2,"timestamp":1700000000000}"#;
        let snap: CapabilitySnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.worker_id, "w1");
        assert!(snap.supports("hash"));
        assert_eq!(snap.idle_slots, 2);
        assert_eq!(snap.observed_at, 1_700_000_000_000);
    }

    #[test]
    fn negative_idle_count_is_rejected() {
        let json = r#"{"worker_id":"w1","capabilities":[],"idle_count":-1,"timestamp":0}"#;
        assert!(serde_json::from_str::<CapabilitySnapshot>(json).is_err());
    }

    #[test]
    fn busy_worker_cannot_accept() {
        let snap = CapabilitySnapshot::new("w1", ["exif"], 0);
        assert!(snap.supports("exif"));
        assert!(!snap.can_accept("exif"));
    }

    #[test]
    fn idle_counts_are_summed_per_task_type() {
        let workers = [
            CapabilitySnapshot::new("w1", ["clip_embedding", "hash"], 1),
            CapabilitySnapshot::new("w2", ["hash"], 2),
            CapabilitySnapshot::new("w3", ["exif"], 0),
        ];
        let counts = idle_slots_by_task_type(&workers);
        assert_eq!(counts.get("clip_embedding"), Some(&1));
        assert_eq!(counts.get("hash"), Some(&3));
        assert_eq!(counts.get("exif"), Some(&0));
    }

    #[test]
    fn idle_counts_for_no_workers_is_empty() {
        assert!(idle_slots_by_task_type(std::iter::empty()).is_empty());
    }
}
