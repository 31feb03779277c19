//! In-process broker for tests and single-process deployments.
//!
//! [`MemoryBroker`] routes published messages to every open session with
//! a matching subscription filter (`+` and `#` wildcards supported). It
//! can also refuse connections, stay silent to simulate a connect
//! timeout, and drop every session to exercise reconnects.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cl_core::target::BrokerTarget;
use cl_core::topics::topic_matches;
use tokio::sync::mpsc;

use super::{
    Connector, OpenOptions, TransportError, TransportEvent, TransportEvents, TransportLink,
    TransportPair,
};

/// How the broker answers new connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptMode {
    #[default]
    Accept,
    Refuse,
    /// Never answer, leaving the client waiting for a connect ack.
    Silent,
}

#[derive(Default)]
struct BrokerState {
    sessions: Vec<Session>,
    mode: AcceptMode,
    next_id: u64,
    unsubscribe_delay: Duration,
}

struct Session {
    id: u64,
    client_id: String,
    subscriptions: HashSet<String>,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

/// Shared handle to an in-memory broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    pub fn set_accept_mode(&self, mode: AcceptMode) {
        self.state().mode = mode;
    }

    /// Hold every unsubscribe request for `delay` before applying it.
    pub fn set_unsubscribe_delay(&self, delay: Duration) {
        self.state().unsubscribe_delay = delay;
    }

    /// Deliver a message to every matching session. Returns the number
    /// of sessions it was delivered to.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        let payload = payload.into();
        let state = self.state();
        let mut delivered = 0;
        for session in &state.sessions {
            if session
                .subscriptions
                .iter()
                .any(|filter| topic_matches(filter, topic))
            {
                let event = TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                };
                if session.tx.send(event).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.state()
            .sessions
            .iter()
            .map(|s| s.client_id.clone())
            .collect()
    }

    /// Number of open sessions holding exactly this subscription filter.
    pub fn subscriber_count(&self, filter: &str) -> usize {
        self.state()
            .sessions
            .iter()
            .filter(|s| s.subscriptions.contains(filter))
            .count()
    }

    /// Drop every session's connection and subscriptions.
    ///
    /// Sessions see [`TransportEvent::Disconnected`]; when the broker is
    /// accepting they immediately see [`TransportEvent::Connected`]
    /// again, as a client that reconnects on its own would.
    pub fn drop_connections(&self) {
        let mut state = self.state();
        let reconnect = state.mode == AcceptMode::Accept;
        for session in &mut state.sessions {
            session.subscriptions.clear();
            let _ = session.tx.send(TransportEvent::Disconnected);
            if reconnect {
                let _ = session.tx.send(TransportEvent::Connected);
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_session<F>(&self, id: u64, f: F) -> Result<(), TransportError>
    where
        F: FnOnce(&mut Session),
    {
        let mut state = self.state();
        match state.sessions.iter_mut().find(|s| s.id == id) {
            Some(session) => {
                f(session);
                Ok(())
            }
            None => Err(TransportError::Closed),
        }
    }
}

/// [`Connector`] that opens sessions on a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

impl Connector for MemoryConnector {
    fn open(
        &self,
        _target: &BrokerTarget,
        options: &OpenOptions,
    ) -> Result<TransportPair, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.broker.state();
            let id = state.next_id;
            state.next_id += 1;

            match state.mode {
                AcceptMode::Accept => {
                    let _ = tx.send(TransportEvent::Connected);
                }
                AcceptMode::Refuse => {
                    let _ = tx.send(TransportEvent::ConnectRefused("refused by broker".into()));
                }
                AcceptMode::Silent => {}
            }

            state.sessions.push(Session {
                id,
                client_id: options.client_id.clone(),
                subscriptions: HashSet::new(),
                tx,
            });
            id
        };

        Ok(TransportPair {
            link: Arc::new(MemoryLink {
                broker: self.broker.clone(),
                session_id: id,
            }),
            events: Box::new(MemoryEvents { rx }),
        })
    }
}

struct MemoryLink {
    broker: MemoryBroker,
    session_id: u64,
}

#[async_trait]
impl TransportLink for MemoryLink {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.broker.with_session(self.session_id, |s| {
            s.subscriptions.insert(topic.to_string());
        })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let delay = self.broker.state().unsubscribe_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.broker.with_session(self.session_id, |s| {
            s.subscriptions.remove(topic);
        })
    }

    fn subscribe_many(&self, topics: &[String]) -> Result<(), TransportError> {
        self.broker.with_session(self.session_id, |s| {
            s.subscriptions.extend(topics.iter().cloned());
        })
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        state.sessions.retain(|s| s.id != self.session_id);
        Ok(())
    }
}

struct MemoryEvents {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl TransportEvents for MemoryEvents {
    async fn next_event(&mut self) -> Result<TransportEvent, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(client_id: &str) -> OpenOptions {
        OpenOptions {
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn accepting_broker_sends_connected() {
        let broker = MemoryBroker::new();
        let mut pair = broker
            .connector()
            .open(&BrokerTarget::new("mem", 1883), &options("c1"))
            .unwrap();
        assert_eq!(pair.events.next_event().await.unwrap(), TransportEvent::Connected);
        assert_eq!(broker.open_sessions(), 1);
    }

    #[tokio::test]
    async fn publish_routes_by_filter() {
        let broker = MemoryBroker::new();
        let mut pair = broker
            .connector()
            .open(&BrokerTarget::new("mem", 1883), &options("c1"))
            .unwrap();
        pair.link.subscribe("inference/workers/+").await.unwrap();
        let _ = pair.events.next_event().await;

        assert_eq!(broker.publish("inference/events", b"x".to_vec()), 0);
        assert_eq!(broker.publish("inference/workers/w1", b"y".to_vec()), 1);

        let event = pair.events.next_event().await.unwrap();
        assert_eq!(
            event,
            TransportEvent::Message {
                topic: "inference/workers/w1".into(),
                payload: b"y".to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn disconnect_closes_event_stream() {
        let broker = MemoryBroker::new();
        let mut pair = broker
            .connector()
            .open(&BrokerTarget::new("mem", 1883), &options("c1"))
            .unwrap();
        let _ = pair.events.next_event().await;
        pair.link.disconnect().unwrap();

        assert_eq!(broker.open_sessions(), 0);
        assert!(matches!(
            pair.events.next_event().await,
            Err(TransportError::Closed)
        ));
        assert!(pair.link.subscribe("a").await.is_err());
        assert!(pair.link.subscribe_many(&["a".to_string()]).is_err());
    }

    #[tokio::test]
    async fn refusing_broker_reports_refusal() {
        let broker = MemoryBroker::new();
        broker.set_accept_mode(AcceptMode::Refuse);
        let mut pair = broker
            .connector()
            .open(&BrokerTarget::new("mem", 1883), &options("c1"))
            .unwrap();
        assert!(matches!(
            pair.events.next_event().await.unwrap(),
            TransportEvent::ConnectRefused(_)
        ));
    }

    #[tokio::test]
    async fn batch_subscribe_adds_every_topic() {
        let broker = MemoryBroker::new();
        let pair = broker
            .connector()
            .open(&BrokerTarget::new("mem", 1883), &options("c1"))
            .unwrap();
        let topics: Vec<String> = (0..3).map(|i| format!("t/{i}")).collect();
        pair.link.subscribe_many(&topics).unwrap();

        for topic in &topics {
            assert_eq!(broker.subscriber_count(topic), 1);
        }
        pair.link.unsubscribe("t/1").await.unwrap();
        assert_eq!(broker.subscriber_count("t/1"), 0);
    }
}
