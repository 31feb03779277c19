//! Inbound message demultiplexing.
//!
//! [`MessageRouter::on_message`] is called by the connection's I/O task
//! for every message. It classifies the topic, decodes the payload and
//! hands the result to the matching registry. Decoding failures are
//! logged and the message dropped; nothing propagates back to the I/O
//! task.

use std::sync::Arc;

use cl_core::topics::{TopicKind, TopicLayout};

use crate::callback::CallbackDispatcher;
use crate::capability::CapabilityRegistry;
use crate::entity::EntityWatchRegistry;
use crate::jobs::JobWatchRegistry;
use crate::messages::{parse_capability, parse_entity_status, parse_job_event, MessageError};

pub struct MessageRouter {
    topics: TopicLayout,
    dispatcher: Arc<CallbackDispatcher>,
    capabilities: CapabilityRegistry,
    jobs: JobWatchRegistry,
    entities: EntityWatchRegistry,
}

impl MessageRouter {
    /// Build a router whose dispatcher captures the current runtime, if
    /// there is one.
    pub fn new(topics: TopicLayout) -> Self {
        let dispatcher = Arc::new(CallbackDispatcher::new());
        dispatcher.capture_current();
        Self::with_dispatcher(topics, dispatcher)
    }

    pub fn with_dispatcher(topics: TopicLayout, dispatcher: Arc<CallbackDispatcher>) -> Self {
        Self {
            capabilities: CapabilityRegistry::new(Arc::clone(&dispatcher)),
            jobs: JobWatchRegistry::new(Arc::clone(&dispatcher)),
            entities: EntityWatchRegistry::new(Arc::clone(&dispatcher)),
            topics,
            dispatcher,
        }
    }

    pub fn topics(&self) -> &TopicLayout {
        &self.topics
    }

    pub fn dispatcher(&self) -> &CallbackDispatcher {
        &self.dispatcher
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn jobs(&self) -> &JobWatchRegistry {
        &self.jobs
    }

    pub fn entities(&self) -> &EntityWatchRegistry {
        &self.entities
    }

    /// Route one inbound message. Unrecognised topics are ignored.
    pub async fn on_message(&self, topic: &str, payload: &[u8]) {
        let Some(kind) = self.topics.classify(topic) else {
            tracing::trace!(topic, "Ignoring message on unrecognised topic");
            return;
        };

        let result = match kind {
            TopicKind::Capability { worker_id } => self.handle_capability(worker_id, payload).await,
            TopicKind::JobEvents => self.handle_job_event(payload).await,
            TopicKind::EntityStatus => self.handle_entity_status(payload).await,
        };

        if let Err(e) = result {
            tracing::warn!(
                topic,
                kind = ?kind,
                payload_len = payload.len(),
                error = %e,
                "Dropping malformed message",
            );
        }
    }

    async fn handle_capability(&self, worker_id: &str, payload: &[u8]) -> Result<(), MessageError> {
        // Empty payload is the worker's last will: it went away.
        if payload.is_empty() {
            self.capabilities.remove(worker_id).await;
            return Ok(());
        }

        let snapshot = parse_capability(payload)?;
        if snapshot.worker_id != worker_id {
            tracing::debug!(
                topic_worker = worker_id,
                payload_worker = %snapshot.worker_id,
                "Capability payload names a different worker than its topic",
            );
        }
        self.capabilities.update(snapshot).await;
        Ok(())
    }

    async fn handle_job_event(&self, payload: &[u8]) -> Result<(), MessageError> {
        if payload.is_empty() {
            return Ok(());
        }
        let event = parse_job_event(payload)?;
        tracing::trace!(
            job_id = %event.job_id,
            event_type = %event.event_type,
            "Job event received",
        );
        self.jobs.dispatch(&event).await;
        Ok(())
    }

    async fn handle_entity_status(&self, payload: &[u8]) -> Result<(), MessageError> {
        if payload.is_empty() {
            return Ok(());
        }
        let status = parse_entity_status(payload)?;
        self.entities.dispatch(&status).await;
        Ok(())
    }
}
