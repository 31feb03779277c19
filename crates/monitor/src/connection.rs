//! Transport connection lifecycle.
//!
//! [`Connection::open`] creates the transport, spawns the I/O task that
//! drives it, and waits (bounded by the configured connect timeout) for
//! the broker's acknowledgement. A timeout or refusal is logged, never
//! raised: the returned connection keeps trying in the background.
//!
//! The I/O task polls the transport's event stream and calls
//! [`MessageRouter::on_message`] for every inbound message. Each time the
//! broker (re)acknowledges the connection, the capability wildcard, the
//! job-events topic and every live entity topic are subscribed again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cl_core::target::BrokerTarget;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::reconnect::{Backoff, ReconnectConfig};
use crate::router::MessageRouter;
use crate::transport::{
    Connector, OpenOptions, TransportError, TransportEvent, TransportEvents, TransportLink,
};

/// How long `close` waits for the I/O task to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A live transport connection and its I/O task.
pub struct Connection {
    target: BrokerTarget,
    client_id: String,
    link: Arc<dyn TransportLink>,
    connected: watch::Receiver<bool>,
    cancel: CancellationToken,
    closed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Open a connection to `target` and wait up to
    /// `config.connect_timeout` for the broker to accept it.
    ///
    /// Only a failure to create the transport is returned as an error.
    pub async fn open(
        target: BrokerTarget,
        config: &MonitorConfig,
        connector: &dyn Connector,
        router: Arc<MessageRouter>,
    ) -> Result<Self, TransportError> {
        let client_id = format!("{}-{}", config.client_id_prefix, uuid::Uuid::new_v4());
        let options = OpenOptions {
            client_id: client_id.clone(),
            keep_alive: config.keep_alive,
        };
        let pair = connector.open(&target, &options)?;

        let (connected_tx, connected_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_event_loop(
            pair.events,
            Arc::clone(&pair.link),
            router,
            connected_tx,
            cancel.clone(),
            config.reconnect.clone(),
        ));

        let connection = Self {
            target,
            client_id,
            link: pair.link,
            connected: connected_rx,
            cancel,
            closed: AtomicBool::new(false),
            task: Mutex::new(Some(task)),
        };

        connection.wait_connected(config.connect_timeout).await;
        Ok(connection)
    }

    async fn wait_connected(&self, timeout: Duration) {
        let mut state = self.connected.clone();
        match tokio::time::timeout(timeout, state.wait_for(|connected| *connected)).await {
            Ok(Ok(_)) => {
                tracing::info!(
                    target_url = %self.target,
                    client_id = %self.client_id,
                    "Connected to broker",
                );
            }
            Ok(Err(_)) => {
                tracing::warn!(
                    target_url = %self.target,
                    "Transport stopped before the broker accepted the connection",
                );
            }
            Err(_) => {
                tracing::warn!(
                    target_url = %self.target,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for broker; continuing to connect in the background",
                );
            }
        };
    }

    pub fn target(&self) -> &BrokerTarget {
        &self.target
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue a subscription, waiting while the request queue is full.
    /// Failures are logged; the topic is picked up again on the next
    /// reconnect if it is still wanted.
    pub async fn subscribe(&self, topic: &str) {
        if let Err(e) = self.link.subscribe(topic).await {
            tracing::warn!(topic, error = %e, "Failed to subscribe");
        }
    }

    pub async fn unsubscribe(&self, topic: &str) {
        if let Err(e) = self.link.unsubscribe(topic).await {
            tracing::warn!(topic, error = %e, "Failed to unsubscribe");
        }
    }

    /// Disconnect and stop the I/O task. Safe to call more than once.
    ///
    /// The disconnect request is queued first and the I/O task keeps
    /// running until it has gone out, for at most [`SHUTDOWN_GRACE`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.link.disconnect() {
            tracing::debug!(error = %e, "Disconnect request failed");
        }

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut task) = task {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::debug!("Disconnect not flushed in time, stopping I/O task");
                self.cancel.cancel();
                let _ = task.await;
            }
        }
        self.cancel.cancel();

        tracing::info!(target_url = %self.target, client_id = %self.client_id, "Connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Subscribe to the fixed topics plus every entity topic still watched,
/// as one request.
async fn subscribe_all(link: &dyn TransportLink, router: &MessageRouter) {
    let topics = router.topics();
    let mut wanted = vec![topics.capability_filter(), topics.job_events_topic.clone()];
    wanted.extend(router.entities().topics().await);

    match link.subscribe_many(&wanted) {
        Ok(()) => tracing::debug!(count = wanted.len(), "Subscriptions issued"),
        Err(e) => tracing::warn!(count = wanted.len(), error = %e, "Failed to subscribe"),
    }
}

/// Drive the transport until cancelled or the event stream ends.
async fn run_event_loop(
    mut events: Box<dyn TransportEvents>,
    link: Arc<dyn TransportLink>,
    router: Arc<MessageRouter>,
    connected: watch::Sender<bool>,
    cancel: CancellationToken,
    reconnect: ReconnectConfig,
) {
    let mut backoff = Backoff::new(reconnect);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.next_event() => event,
        };

        match event {
            Ok(TransportEvent::Connected) => {
                backoff.reset();
                subscribe_all(link.as_ref(), &router).await;
                connected.send_replace(true);
            }
            Ok(TransportEvent::Message { topic, payload }) => {
                router.on_message(&topic, &payload).await;
            }
            Ok(TransportEvent::Disconnected) => {
                connected.send_replace(false);
                tracing::info!("Broker closed the connection");
            }
            Ok(TransportEvent::ConnectRefused(reason)) => {
                connected.send_replace(false);
                tracing::warn!(reason = %reason, "Broker refused the connection");
                if !backoff.wait(&cancel).await {
                    break;
                }
            }
            Err(TransportError::Closed) => break,
            Err(e) => {
                connected.send_replace(false);
                tracing::error!(error = %e, "Transport error");
                if !backoff.wait(&cancel).await {
                    break;
                }
            }
        }
    }

    connected.send_replace(false);
    tracing::debug!("Transport event loop stopped");
}
