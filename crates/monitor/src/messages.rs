//! Wire payloads for the three topic families and their parsers.
//!
//! Every parser returns `Err` for malformed input; the router logs and
//! drops those messages so a bad payload never reaches a watcher.

use cl_core::capability::CapabilitySnapshot;
use cl_core::entity::EntityStatus;
use cl_core::types::TimestampMs;
use serde::Deserialize;

/// A job lifecycle event from the consolidated events topic.
///
/// `progress` may be an integer or a float on the wire, or absent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub event_type: String,
    pub timestamp: TimestampMs,
    #[serde(default)]
    pub progress: Option<f64>,
}

impl JobEvent {
    pub fn new(job_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            event_type: event_type.into(),
            timestamp: 0,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_terminal(&self) -> bool {
        cl_core::job::is_terminal(&self.event_type)
    }
}

/// Errors produced while decoding an inbound payload.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("payload is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("payload does not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("empty payload")]
    Empty,
}

/// Parse a non-empty capability payload.
///
/// Empty payloads are a disconnect signal and must be handled by the
/// caller before reaching this function.
pub fn parse_capability(payload: &[u8]) -> Result<CapabilitySnapshot, MessageError> {
    parse_json(payload)
}

pub fn parse_job_event(payload: &[u8]) -> Result<JobEvent, MessageError> {
    parse_json(payload)
}

pub fn parse_entity_status(payload: &[u8]) -> Result<EntityStatus, MessageError> {
    parse_json(payload)
}

fn parse_json<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T, MessageError> {
    if payload.is_empty() {
        return Err(MessageError::Empty);
    }
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}
