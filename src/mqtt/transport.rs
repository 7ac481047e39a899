//! Network boundary between a printer session and the broker.
//!
//! ```text
//!            MqttConnector::connect
//! session ─────────────────────────────► MqttLink
//!    │                                   ├── client: Box<dyn LinkClient>   (subscribe / publish / disconnect)
//!    └──────── LinkEvent ◄────────────── └── events: mpsc::Receiver<LinkEvent>
//! ```
//!
//! The rumqttc implementation spawns one task per link that polls the
//! `EventLoop` and forwards the packets the session cares about. The forwarder
//! stops after the first connection error instead of letting rumqttc reconnect
//! on its own; reconnecting is the session's job.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet, QoS,
    SubscribeFilter, SubscribeReasonCode,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::config;
use super::error::SessionError;
use crate::cloud::MqttCredentials;
use crate::printer::PrinterId;

/// Time a graceful disconnect may take to flush before the link is dropped.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Broker answer to CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnAck {
    Accepted,
    Refused(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    ConnAck(ConnAck),
    /// `success` is false when any filter got a failure return code.
    SubAck { success: bool },
    Message { topic: String, payload: Vec<u8> },
    /// The connection is gone. No further events follow.
    Dropped(String),
}

#[async_trait]
pub trait LinkClient: Send + Sync {
    /// Subscribe to all `topics` in one request, answered by one SUBACK.
    async fn subscribe(&self, topics: &[String]) -> Result<(), SessionError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SessionError>;

    async fn disconnect(&self) -> Result<(), SessionError>;
}

/// One broker connection as seen by a session.
pub struct MqttLink {
    pub client: Box<dyn LinkClient>,
    pub events: mpsc::Receiver<LinkEvent>,
}

impl std::fmt::Debug for MqttLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttLink").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait MqttConnector: Send + Sync {
    /// Start connecting. The CONNACK arrives as the first [`LinkEvent`].
    async fn connect(
        &self,
        printer_id: PrinterId,
        credentials: &MqttCredentials,
    ) -> Result<MqttLink, SessionError>;
}

/// Connector for the cloud broker over TLS.
#[derive(Debug, Clone, Default)]
pub struct RumqttcConnector;

#[async_trait]
impl MqttConnector for RumqttcConnector {
    async fn connect(
        &self,
        printer_id: PrinterId,
        credentials: &MqttCredentials,
    ) -> Result<MqttLink, SessionError> {
        let options = config::mqtt_options(credentials);
        let (client, eventloop) = AsyncClient::new(options, config::link_capacity());
        let (events_tx, events_rx) = mpsc::channel(config::link_capacity());

        let stop = CancellationToken::new();
        let finished = CancellationToken::new();
        tokio::spawn(
            forward_events(eventloop, events_tx, stop.clone(), finished.clone())
                .instrument(tracing::debug_span!("mqtt_link", %printer_id)),
        );

        debug!("Opening broker link for printer {}", printer_id);
        Ok(MqttLink {
            client: Box::new(RumqttcLinkClient {
                client,
                stop,
                finished,
            }),
            events: events_rx,
        })
    }
}

struct RumqttcLinkClient {
    client: AsyncClient,
    stop: CancellationToken,
    finished: CancellationToken,
}

impl Drop for RumqttcLinkClient {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[async_trait]
impl LinkClient for RumqttcLinkClient {
    async fn subscribe(&self, topics: &[String]) -> Result<(), SessionError> {
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));
        self.client
            .subscribe_many(filters)
            .await
            .map_err(|e| SessionError::Connect(format!("subscribe request failed: {}", e)))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SessionError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| SessionError::Dropped(format!("publish request failed: {}", e)))
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| SessionError::Dropped(format!("disconnect request failed: {}", e)))?;
        if tokio::time::timeout(DISCONNECT_GRACE, self.finished.cancelled())
            .await
            .is_err()
        {
            debug!("Disconnect not flushed within {:?}", DISCONNECT_GRACE);
        }
        Ok(())
    }
}

async fn forward_events(
    mut eventloop: EventLoop,
    events: mpsc::Sender<LinkEvent>,
    stop: CancellationToken,
    finished: CancellationToken,
) {
    let _finished = finished.drop_guard();

    loop {
        let polled = tokio::select! {
            _ = stop.cancelled() => {
                debug!("Link forwarder stopped");
                return;
            }
            polled = eventloop.poll() => polled,
        };

        let event = match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                LinkEvent::ConnAck(match ack.code {
                    ConnectReturnCode::Success => ConnAck::Accepted,
                    code => ConnAck::Refused(format!("{:?}", code)),
                })
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => LinkEvent::SubAck {
                success: ack
                    .return_codes
                    .iter()
                    .all(|code| matches!(code, SubscribeReasonCode::Success(_))),
            },
            Ok(Event::Incoming(Packet::Publish(publish))) => LinkEvent::Message {
                topic: publish.topic.clone(),
                payload: publish.payload.to_vec(),
            },
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Broker link closed");
                return;
            }
            Ok(_) => continue,
            Err(ConnectionError::ConnectionRefused(code)) => {
                let _ = events
                    .send(LinkEvent::ConnAck(ConnAck::Refused(format!("{:?}", code))))
                    .await;
                return;
            }
            Err(e) => {
                warn!("Broker link failed: {}", e);
                let _ = events.send(LinkEvent::Dropped(e.to_string())).await;
                return;
            }
        };

        if events.send(event).await.is_err() {
            debug!("Session gone, closing link");
            return;
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory broker for session tests.
    //!
    //! Each `connect` consumes the next scripted [`Behaviour`]; once the script
    //! runs dry every attempt completes the handshake.

    use super::*;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Behaviour {
        Accept,
        /// `connect` itself fails (network or TLS).
        Unreachable,
        RefuseCredentials,
        /// Broker never answers CONNECT.
        NoConnAck,
        RejectSubscribe,
        /// Broker never answers SUBSCRIBE.
        NoSubAck,
    }

    #[derive(Debug, Clone, Default)]
    pub struct FakeConnector {
        inner: Arc<Mutex<FakeBroker>>,
    }

    #[derive(Debug, Default)]
    struct FakeBroker {
        script: VecDeque<Behaviour>,
        attempts: Vec<Instant>,
        current: Option<mpsc::Sender<LinkEvent>>,
        subscriptions: Vec<String>,
        published: Vec<(String, Value)>,
        disconnects: usize,
    }

    impl FakeConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(&self, behaviours: impl IntoIterator<Item = Behaviour>) {
            self.inner.lock().unwrap().script.extend(behaviours);
        }

        /// Instants of every `connect` call.
        pub fn attempts(&self) -> Vec<Instant> {
            self.inner.lock().unwrap().attempts.clone()
        }

        pub fn subscriptions(&self) -> Vec<String> {
            self.inner.lock().unwrap().subscriptions.clone()
        }

        pub fn published(&self) -> Vec<(String, Value)> {
            self.inner.lock().unwrap().published.clone()
        }

        pub fn disconnects(&self) -> usize {
            self.inner.lock().unwrap().disconnects
        }

        /// Deliver a frame on the current link. False without a live link.
        pub async fn inject(&self, topic: &str, payload: &[u8]) -> bool {
            let sender = self.inner.lock().unwrap().current.clone();
            match sender {
                Some(sender) => sender
                    .send(LinkEvent::Message {
                        topic: topic.to_string(),
                        payload: payload.to_vec(),
                    })
                    .await
                    .is_ok(),
                None => false,
            }
        }

        /// Break the current link as a network failure would.
        pub async fn drop_link(&self, reason: &str) {
            let sender = self.inner.lock().unwrap().current.take();
            if let Some(sender) = sender {
                let _ = sender.send(LinkEvent::Dropped(reason.to_string())).await;
            }
        }

        /// Answer the most recent published command on the printer's app topic.
        pub async fn ack_last(&self, code: i64) -> bool {
            let last = self.inner.lock().unwrap().published.last().cloned();
            let Some((topic, command)) = last else {
                return false;
            };
            let Some(printer_and_kind) = topic.strip_prefix(crate::mqtt::topic::MQTT_ROOT_TOPIC_PUBLISH)
            else {
                return false;
            };
            let reply = serde_json::json!({
                "type": command["type"],
                "action": command["action"],
                "msgid": command["msgid"],
                "state": "done",
                "code": code,
            });
            self.inject(
                &format!(
                    "{}{}/report",
                    crate::mqtt::topic::MQTT_ROOT_TOPIC_PRINTER,
                    printer_and_kind
                ),
                reply.to_string().as_bytes(),
            )
            .await
        }
    }

    #[async_trait]
    impl MqttConnector for FakeConnector {
        async fn connect(
            &self,
            _printer_id: PrinterId,
            _credentials: &MqttCredentials,
        ) -> Result<MqttLink, SessionError> {
            let (tx, rx) = mpsc::channel(64);
            let behaviour = {
                let mut broker = self.inner.lock().unwrap();
                broker.attempts.push(Instant::now());
                let behaviour = broker.script.pop_front().unwrap_or(Behaviour::Accept);
                if behaviour == Behaviour::Unreachable {
                    return Err(SessionError::Connect("connection refused".to_string()));
                }
                broker.current = Some(tx.clone());
                behaviour
            };

            match behaviour {
                Behaviour::RefuseCredentials => {
                    let _ = tx
                        .send(LinkEvent::ConnAck(ConnAck::Refused(
                            "BadUserNamePassword".to_string(),
                        )))
                        .await;
                }
                Behaviour::NoConnAck => {}
                _ => {
                    let _ = tx.send(LinkEvent::ConnAck(ConnAck::Accepted)).await;
                }
            }

            Ok(MqttLink {
                client: Box::new(FakeLinkClient {
                    inner: self.inner.clone(),
                    events: tx,
                    behaviour,
                }),
                events: rx,
            })
        }
    }

    struct FakeLinkClient {
        inner: Arc<Mutex<FakeBroker>>,
        events: mpsc::Sender<LinkEvent>,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl LinkClient for FakeLinkClient {
        async fn subscribe(&self, topics: &[String]) -> Result<(), SessionError> {
            self.inner
                .lock()
                .unwrap()
                .subscriptions
                .extend(topics.iter().cloned());
            match self.behaviour {
                Behaviour::NoSubAck => {}
                Behaviour::RejectSubscribe => {
                    let _ = self.events.send(LinkEvent::SubAck { success: false }).await;
                }
                _ => {
                    let _ = self.events.send(LinkEvent::SubAck { success: true }).await;
                }
            }
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SessionError> {
            let body: Value = serde_json::from_slice(&payload)
                .map_err(|e| SessionError::Dropped(e.to_string()))?;
            self.inner
                .lock()
                .unwrap()
                .published
                .push((topic.to_string(), body));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), SessionError> {
            let mut broker = self.inner.lock().unwrap();
            broker.disconnects += 1;
            broker.current = None;
            Ok(())
        }
    }
}
