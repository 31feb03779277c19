//! Job-event monitoring and worker capability tracking.
//!
//! A single broker connection per target carries three kinds of traffic:
//! worker capability snapshots, the consolidated job-events stream and
//! per-entity status reports from the store. This crate routes those
//! messages to registered watches and shares the connection between all
//! users in the process.
//!
//! - [`MonitorRegistry`] -- reference-counted [`JobMonitor`] per target.
//! - [`JobMonitor`] -- watch jobs and entities, wait for workers.
//! - [`MessageRouter`] -- classifies inbound topics and feeds the
//!   capability, job and entity registries.
//! - [`Callback`] -- inline callbacks run on the I/O task; deferred ones
//!   are queued onto the runtime that registered them.

pub mod api;
pub mod callback;
pub mod capability;
pub mod config;
pub mod connection;
pub mod entity;
pub mod error;
pub mod jobs;
pub mod messages;
pub mod monitor;
pub mod reconnect;
pub mod router;
pub mod shared;
pub mod transport;

pub use api::{ApiError, HttpJobLookup, JobLookup};
pub use callback::{Callback, CallbackDispatcher, SchedulingContext};
pub use capability::{CapabilityChange, CapabilityRegistry};
pub use config::MonitorConfig;
pub use error::MonitorError;
pub use monitor::JobMonitor;
pub use router::MessageRouter;
pub use shared::MonitorRegistry;
