//! MQTT transport backed by `rumqttc`.
//!
//! All subscriptions use QoS 0: the broadcast channel is best-effort
//! and at-most-once.
//!
//! Requests travel through a bounded queue that only the event loop
//! drains. Resubscription after a reconnect is a single batched request
//! so it fits however many topics are live.

use std::sync::Arc;

use async_trait::async_trait;
use cl_core::target::BrokerTarget;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeFilter,
};

use super::{
    Connector, OpenOptions, TransportError, TransportEvent, TransportEvents, TransportLink,
    TransportPair,
};

/// Capacity of the request queue between the client and its event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Opens `rumqttc` connections.
pub struct MqttConnector {
    capacity: usize,
}

impl MqttConnector {
    pub fn new() -> Self {
        Self {
            capacity: REQUEST_CHANNEL_CAPACITY,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MqttConnector {
    fn open(
        &self,
        target: &BrokerTarget,
        options: &OpenOptions,
    ) -> Result<TransportPair, TransportError> {
        let mut mqtt_options =
            MqttOptions::new(options.client_id.clone(), target.host.clone(), target.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(mqtt_options, self.capacity);

        tracing::debug!(
            client_id = %options.client_id,
            target = %target,
            "Opened MQTT client",
        );

        Ok(TransportPair {
            link: Arc::new(MqttLink { client }),
            events: Box::new(MqttEvents { eventloop }),
        })
    }
}

struct MqttLink {
    client: AsyncClient,
}

#[async_trait]
impl TransportLink for MqttLink {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn subscribe_many(&self, topics: &[String]) -> Result<(), TransportError> {
        if topics.is_empty() {
            return Ok(());
        }
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));
        self.client
            .try_subscribe_many(filters)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.client
            .try_disconnect()
            .map_err(|e| TransportError::Request(e.to_string()))
    }
}

struct MqttEvents {
    eventloop: EventLoop,
}

#[async_trait]
impl TransportEvents for MqttEvents {
    async fn next_event(&mut self) -> Result<TransportEvent, TransportError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return Ok(if ack.code == ConnectReturnCode::Success {
                        TransportEvent::Connected
                    } else {
                        TransportEvent::ConnectRefused(format!("{:?}", ack.code))
                    });
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(TransportEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return Ok(TransportEvent::Disconnected);
                }
                // Our own DISCONNECT has been written: nothing follows.
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return Err(TransportError::Closed),
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Ok(TransportEvent::ConnectRefused(format!("{code:?}")));
                }
                Err(ConnectionError::RequestsDone) => return Err(TransportError::Closed),
                Err(e) => return Err(TransportError::Connection(e.to_string())),
            }
        }
    }
}
