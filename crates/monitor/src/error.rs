use std::collections::BTreeMap;
use std::time::Duration;

use cl_core::entity::EntityStatus;
use cl_core::error::CoreError;
use cl_core::types::EntityId;

use crate::transport::TransportError;

/// Errors surfaced to callers of the monitor.
///
/// Transport failures while connecting, malformed inbound payloads and
/// unknown subscription ids are logged instead of being returned.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The broker target string could not be parsed.
    #[error(transparent)]
    InvalidTarget(#[from] CoreError),

    /// The monitor configuration is unusable, e.g. a topic prefix that
    /// is empty or contains wildcards.
    #[error("Invalid monitor configuration: {0}")]
    Config(CoreError),

    /// No idle worker advertised the task type before the timeout.
    ///
    /// `available` maps each known task type to the total idle slots
    /// across all known workers at the moment of the timeout.
    #[error("No workers available for task type: {task_type} (available: {available:?})")]
    WorkerUnavailable {
        task_type: String,
        available: BTreeMap<String, u32>,
    },

    #[error("Job {job_id} did not finish within {timeout:?}")]
    JobTimeout { job_id: String, timeout: Duration },

    #[error("Entity {entity_id} did not reach status '{target_status}' within {timeout:?}")]
    EntityTimeout {
        entity_id: EntityId,
        target_status: String,
        timeout: Duration,
    },

    #[error("Entity {} processing failed", .0.entity_id)]
    EntityFailed(EntityStatus),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
