//! Topic layout for the monitoring broadcast channel.
//!
//! Three topic families are consumed:
//!
//! - `<capability_prefix>/<worker_id>` -- worker capability snapshots
//!   (empty payload means the worker disconnected).
//! - `<job_events_topic>` -- one fixed topic carrying events for all jobs.
//! - `<entity_prefix>/<port>/entity_item_status/<entity_id>` -- store
//!   entity status, subscribed per watched entity.

use crate::error::CoreError;
use crate::types::EntityId;

/// Path segment identifying entity-status topics.
pub const ENTITY_STATUS_MARKER: &str = "entity_item_status";

pub const DEFAULT_CAPABILITY_PREFIX: &str = "inference/workers";
pub const DEFAULT_JOB_EVENTS_TOPIC: &str = "inference/events";
pub const DEFAULT_ENTITY_PREFIX: &str = "store";

/// Which family an inbound topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind<'a> {
    Capability { worker_id: &'a str },
    JobEvents,
    EntityStatus,
}

/// Concrete topic names for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    pub capability_prefix: String,
    pub job_events_topic: String,
    pub entity_prefix: String,
}

impl Default for TopicLayout {
    fn default() -> Self {
        Self {
            capability_prefix: DEFAULT_CAPABILITY_PREFIX.into(),
            job_events_topic: DEFAULT_JOB_EVENTS_TOPIC.into(),
            entity_prefix: DEFAULT_ENTITY_PREFIX.into(),
        }
    }
}

impl TopicLayout {
    /// Reject empty names and names containing wildcard characters.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in [
            ("capability prefix", &self.capability_prefix),
            ("job events topic", &self.job_events_topic),
            ("entity prefix", &self.entity_prefix),
        ] {
            if value.is_empty() {
                return Err(CoreError::Validation(format!("{name} must not be empty")));
            }
            if value.contains(['+', '#']) {
                return Err(CoreError::Validation(format!(
                    "{name} must not contain wildcards: {value}"
                )));
            }
        }
        Ok(())
    }

    /// Single-level wildcard filter covering every worker's capability topic.
    pub fn capability_filter(&self) -> String {
        format!("{}/+", self.capability_prefix)
    }

    pub fn capability_topic(&self, worker_id: &str) -> String {
        format!("{}/{}", self.capability_prefix, worker_id)
    }

    /// Status topic for one entity served by the store on `port`.
    pub fn entity_topic(&self, port: u16, entity_id: EntityId) -> String {
        format!(
            "{}/{}/{}/{}",
            self.entity_prefix, port, ENTITY_STATUS_MARKER, entity_id
        )
    }

    /// Classify an inbound topic. Unrecognised topics yield `None`.
    ///
    /// Capability topics are checked first, then the job-events topic,
    /// then the entity-status marker.
    pub fn classify<'a>(&self, topic: &'a str) -> Option<TopicKind<'a>> {
        if let Some(worker_id) = topic
            .strip_prefix(self.capability_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        {
            if !worker_id.is_empty() && !worker_id.contains('/') {
                return Some(TopicKind::Capability { worker_id });
            }
            return None;
        }

        if topic == self.job_events_topic {
            return Some(TopicKind::JobEvents);
        }

        if topic.split('/').any(|segment| segment == ENTITY_STATUS_MARKER) {
            return Some(TopicKind::EntityStatus);
        }

        None
    }
}

/// MQTT-style filter matching with `+` (one level) and `#` (rest) wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn classify_capability_topic() {
        let layout = TopicLayout::default();
        assert_matches!(
            layout.classify("inference/workers/w-17"),
            Some(TopicKind::Capability { worker_id: "w-17" })
        );
    }

    #[test]
    fn capability_prefix_requires_worker_segment() {
        let layout = TopicLayout::default();
        assert_eq!(layout.classify("inference/workers"), None);
        assert_eq!(layout.classify("inference/workers/"), None);
        assert_eq!(layout.classify("inference/workers/a/b"), None);
    }

    #[test]
    fn classify_job_events_topic() {
        let layout = TopicLayout::default();
        assert_eq!(layout.classify("inference/events"), Some(TopicKind::JobEvents));
        assert_eq!(layout.classify("inference/events/extra"), None);
    }

    #[test]
    fn classify_entity_topic() {
        let layout = TopicLayout::default();
        let topic = layout.entity_topic(8001, 42);
        assert_eq!(topic, "store/8001/entity_item_status/42");
        assert_eq!(layout.classify(&topic), Some(TopicKind::EntityStatus));
    }

    #[test]
    fn unknown_topic_is_ignored() {
        assert_eq!(TopicLayout::default().classify("something/else"), None);
    }

    #[test]
    fn validate_rejects_wildcards() {
        let layout = TopicLayout {
            job_events_topic: "inference/#".into(),
            ..Default::default()
        };
        assert_matches!(layout.validate(), Err(CoreError::Validation(_)));
        assert!(TopicLayout::default().validate().is_ok());
    }

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("inference/workers/+", "inference/workers/w1"));
        assert!(!topic_matches("inference/workers/+", "inference/workers/w1/x"));
        assert!(!topic_matches("inference/workers/+", "inference/workers"));
        assert!(topic_matches("store/#", "store/8001/entity_item_status/1"));
        assert!(topic_matches("inference/events", "inference/events"));
        assert!(!topic_matches("inference/events", "inference/event"));
    }
}
