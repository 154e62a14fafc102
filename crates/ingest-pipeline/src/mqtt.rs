//! MQTT Telemetry Source
//!
//! Subscribes to a broker topic and feeds each publish payload into the same
//! queue as the UDP receiver. Payloads use the UDP wire format.

use crate::config::MqttConfig;
use crate::error::PipelineError;
use crate::event::TelemetryEvent;
use crate::ingress::Ingress;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info};

pub struct MqttSource {
    config: MqttConfig,
    ingress: Ingress,
    events: broadcast::Sender<TelemetryEvent>,
}

impl MqttSource {
    pub fn new(config: MqttConfig, ingress: Ingress, events: broadcast::Sender<TelemetryEvent>) -> Self {
        Self {
            config,
            ingress,
            events,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive());
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }
        if self.config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }

    /// Poll the broker connection until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let (client, mut eventloop) = AsyncClient::new(self.options(), self.config.request_capacity.max(1));
        info!(
            "Connecting to MQTT broker {}:{} (topic {})",
            self.config.host, self.config.port, self.config.topic
        );

        loop {
            let polled = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                polled = eventloop.poll() => polled,
            };

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT connected, subscribing to {}", self.config.topic);
                    if let Err(e) = client.try_subscribe(self.config.topic.as_str(), QoS::AtMostOnce) {
                        self.report(format!("Subscribe to {} failed: {}", self.config.topic, e));
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.ingress.offer(publish.payload.to_vec());
                }
                Ok(other) => {
                    debug!("MQTT event: {:?}", other);
                }
                Err(e) => {
                    self.report(format!("Connection to {}:{} failed: {}", self.config.host, self.config.port, e));
                    tokio::select! {
                        biased;
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                    }
                }
            }
        }

        if let Err(e) = client.try_disconnect() {
            debug!("MQTT disconnect: {}", e);
        }
        info!("MQTT source stopped");
    }

    fn report(&self, message: String) {
        error!("MQTT error: {}", message);
        let _ = self.events.send(TelemetryEvent::Error(PipelineError::Mqtt(message)));
    }
}
