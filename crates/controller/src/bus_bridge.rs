use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use shared::{
    broker::BrokerAddress,
    domain::{Action, PropId, PuzzleState},
    protocol::{BusCommand, BusRecord, CommandRecord, EventRecord, StatusRecord, Topics},
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{error::ProtocolFault, router::ControllerEvent};

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 64;
/// How long a connected bridge waits for the router's disconnect to flush.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Outbound half of the bus, used by the router for fan-out.
///
/// Implementations only enqueue; the bus event loop performs the I/O, so a
/// broker outage never stalls the router.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Retained, at-least-once.
    async fn publish_status(&self, state: PuzzleState) -> anyhow::Result<()>;
    async fn publish_event(&self, action: Action) -> anyhow::Result<()>;
    async fn disconnect(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct PropIdentity {
    pub prop_id: PropId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct BusSettings {
    pub broker: BrokerAddress,
    pub identity: PropIdentity,
    pub topics: Topics,
    pub reconnect_interval: Duration,
}

pub fn mqtt_options(settings: &BusSettings) -> anyhow::Result<MqttOptions> {
    let client_id = format!(
        "{}-{}",
        settings.identity.prop_id,
        Utc::now().timestamp_millis()
    );
    let mut options = MqttOptions::new(
        client_id,
        settings.broker.host.clone(),
        settings.broker.port,
    );
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);

    let offline = BusRecord::Status(StatusRecord::offline(
        settings.identity.prop_id.clone(),
        settings.identity.name.clone(),
        Utc::now(),
    ))
    .to_payload()
    .context("failed to encode last-will status")?;
    options.set_last_will(LastWill::new(
        settings.topics.status.clone(),
        offline,
        QoS::AtLeastOnce,
        true,
    ));
    Ok(options)
}

/// Creates the client pair: the publisher handed to the router and the bridge
/// that drives the connection.
pub fn connect(settings: BusSettings) -> anyhow::Result<(MqttPublisher, BusBridge)> {
    let options = mqtt_options(&settings)?;
    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let publisher = MqttPublisher {
        client: client.clone(),
        identity: settings.identity.clone(),
        topics: settings.topics.clone(),
    };
    let bridge = BusBridge {
        client,
        eventloop,
        settings,
    };
    Ok((publisher, bridge))
}

pub struct MqttPublisher {
    client: AsyncClient,
    identity: PropIdentity,
    topics: Topics,
}

#[async_trait]
impl BusPublisher for MqttPublisher {
    async fn publish_status(&self, state: PuzzleState) -> anyhow::Result<()> {
        let payload = BusRecord::Status(StatusRecord::online(
            self.identity.prop_id.clone(),
            self.identity.name.clone(),
            state,
            Utc::now(),
        ))
        .to_payload()?;
        self.client
            .try_publish(self.topics.status.as_str(), QoS::AtLeastOnce, true, payload)
            .context("failed to queue status publish")
    }

    async fn publish_event(&self, action: Action) -> anyhow::Result<()> {
        let payload = BusRecord::Event(EventRecord::new(
            self.identity.prop_id.clone(),
            action,
            Utc::now(),
        ))
        .to_payload()?;
        self.client
            .try_publish(self.topics.event.as_str(), QoS::AtMostOnce, false, payload)
            .context("failed to queue event publish")
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.client
            .try_disconnect()
            .context("failed to queue bus disconnect")
    }
}

/// Drives the MQTT event loop: reconnects on a fixed interval, resubscribes on
/// every connect, and turns inbound commands into router events.
pub struct BusBridge {
    client: AsyncClient,
    eventloop: EventLoop,
    settings: BusSettings,
}

impl BusBridge {
    pub async fn run(
        mut self,
        events: mpsc::Sender<ControllerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(broker = %self.settings.broker, "connecting to bus");
        let mut connected = false;
        loop {
            let polled = tokio::select! {
                polled = self.eventloop.poll() => polled,
                _ = shutdown.changed() => {
                    if connected {
                        self.flush_disconnect().await;
                    }
                    break;
                }
            };
            match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    connected = true;
                    info!(broker = %self.settings.broker, "connected to bus");
                    self.subscribe();
                    if events.send(ControllerEvent::BusConnected).await.is_err() {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some(event) = route_payload(
                        &self.settings.identity.prop_id,
                        &publish.topic,
                        &publish.payload,
                    ) else {
                        continue;
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("disconnected from bus");
                    break;
                }
                Ok(_) => {}
                Err(error) => {
                    connected = false;
                    let shutting_down = *shutdown.borrow();
                    if shutting_down {
                        break;
                    }
                    warn!(
                        %error,
                        retry_in_ms = self.settings.reconnect_interval.as_millis() as u64,
                        "bus connection error"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.reconnect_interval) => {}
                        _ = shutdown.changed() => break,
                    }
                    info!("reconnecting to bus");
                }
            }
        }
    }

    /// Keeps polling until the queued disconnect goes out, so the broker
    /// does not publish the last will on a clean stop.
    async fn flush_disconnect(&mut self) {
        let eventloop = &mut self.eventloop;
        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        match flushed {
            Ok(()) => info!("disconnected from bus"),
            Err(_) => warn!("bus disconnect not flushed before shutdown"),
        }
    }

    fn subscribe(&self) {
        let topics = &self.settings.topics;
        for topic in [&topics.cmd, &topics.broadcast_cmd] {
            match self.client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                Ok(()) => debug!(%topic, "subscribed"),
                Err(error) => warn!(%topic, %error, "subscribe failed"),
            }
        }
    }
}

/// Turns an inbound payload into a router event. Every rejection is dropped
/// here; only unknown commands are worth an operator's attention.
pub fn route_payload(prop_id: &PropId, topic: &str, payload: &[u8]) -> Option<ControllerEvent> {
    match parse_command(prop_id, payload) {
        Ok((command, record)) => {
            info!(%topic, command = command.name(), params = ?record.params, "bus command");
            Some(ControllerEvent::Bus(command))
        }
        Err(ProtocolFault::UnknownCommand(command)) => {
            info!(%topic, %command, "unknown bus command ignored");
            None
        }
        Err(fault) => {
            debug!(%topic, %fault, "bus payload dropped");
            None
        }
    }
}

pub fn parse_command(
    prop_id: &PropId,
    payload: &[u8],
) -> Result<(BusCommand, CommandRecord), ProtocolFault> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|_| ProtocolFault::Malformed)?;
    if value.get("type").and_then(serde_json::Value::as_str) != Some("cmd") {
        return Err(ProtocolFault::NotACommand);
    }
    let record: CommandRecord =
        serde_json::from_value(value).map_err(|_| ProtocolFault::Malformed)?;

    if !record.is_addressed_to(prop_id) {
        let target = record.prop_id.clone().unwrap_or_else(|| PropId::new(""));
        return Err(ProtocolFault::OtherProp(target));
    }

    match BusCommand::from_name(&record.command) {
        Some(command) => Ok((command, record)),
        None => Err(ProtocolFault::UnknownCommand(record.command)),
    }
}

#[cfg(test)]
#[path = "tests/bus_bridge_tests.rs"]
mod tests;
