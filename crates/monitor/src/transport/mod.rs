//! Publish/subscribe transport abstraction.
//!
//! A transport is split into two halves:
//!
//! - [`TransportLink`] -- control requests. Application-side subscribe
//!   and unsubscribe wait for room in the request queue; the I/O task
//!   only uses the non-blocking batch subscribe and disconnect, since it
//!   is the one draining that queue.
//! - [`TransportEvents`] -- the inbound event stream, polled by the
//!   connection's I/O task.
//!
//! [`Connector`] creates both halves for a broker without performing any
//! I/O; the connection lifecycle drives the event half.

pub mod memory;
pub mod mqtt;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cl_core::target::BrokerTarget;

pub use memory::{AcceptMode, MemoryBroker, MemoryConnector};
pub use mqtt::MqttConnector;

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the connection.
    Connected,
    /// The broker rejected the connection attempt.
    ConnectRefused(String),
    /// An application message arrived.
    Message { topic: String, payload: Vec<u8> },
    /// The broker closed the connection.
    Disconnected,
}

/// Errors raised by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A control request could not be queued.
    #[error("Request failed: {0}")]
    Request(String),

    /// The network connection failed. The transport may recover on the
    /// next poll.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The event stream has ended for good.
    #[error("Transport closed")]
    Closed,
}

/// Control half of a transport connection.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Queue a subscription, waiting while the request queue is full.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Queue one request covering every topic in `topics`. Never waits.
    fn subscribe_many(&self, topics: &[String]) -> Result<(), TransportError>;

    /// Queue a graceful disconnect. Never waits; the event stream ends
    /// once the request has gone out.
    fn disconnect(&self) -> Result<(), TransportError>;
}

/// Inbound half of a transport connection.
#[async_trait]
pub trait TransportEvents: Send {
    async fn next_event(&mut self) -> Result<TransportEvent, TransportError>;
}

/// Both halves of a freshly opened transport.
pub struct TransportPair {
    pub link: Arc<dyn TransportLink>,
    pub events: Box<dyn TransportEvents>,
}

/// Per-connection options passed to a [`Connector`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Client identifier presented to the broker. Must be unique per
    /// live connection.
    pub client_id: String,
    pub keep_alive: Duration,
}

/// Factory for transport connections.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        target: &BrokerTarget,
        options: &OpenOptions,
    ) -> Result<TransportPair, TransportError>;
}
