use std::time::Duration;

use log::{debug, error, info};
use rumqttc::{MqttOptions, QoS, SubscribeFilter};
use serde_derive::Serialize;
use tokio::sync::broadcast;

use crate::{
    config,
    messages::{MeshEvent, Visibility},
};

/// Lifetime the vendor cloud gives to published events.
const CLOUD_EVENT_TTL_SECONDS: u32 = 60;

/// Something tag events can be sent through. Publishing is fire-and-forget:
/// it never waits on the connection, and callers log the error and move on.
#[allow(async_fn_in_trait)]
pub trait Publisher {
    async fn publish(&self, event: &str, data: &str) -> Result<(), rumqttc::ClientError>;
}

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    publisher_id: String,
    topic_path: String,
}

#[derive(Debug, Serialize)]
struct CloudEnvelope<'a> {
    name: &'a str,
    data: &'a str,
    ttl: u32,
    #[serde(rename = "coreid")]
    publisher_id: &'a str,
    private: bool,
}

impl MqttClient {
    pub fn new(
        config: &config::MqttConfig,
        default_publisher_id: &str,
        default_topic_path: &str,
    ) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| default_publisher_id.to_string());

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                publisher_id,
                topic_path: config
                    .topic_path
                    .clone()
                    .unwrap_or_else(|| default_topic_path.to_string()),
            },
            eventloop,
        )
    }

    fn mesh_topic(&self, event: &str) -> String {
        format!("{}/{}", self.topic_path, event)
    }

    fn cloud_topic(&self, event: &str) -> String {
        format!(
            "{}/{}/{}",
            self.topic_path,
            sanitize_name(&self.publisher_id),
            event
        )
    }

    fn event_name<'a>(&self, topic: &'a str) -> &'a str {
        topic
            .strip_prefix(self.topic_path.as_str())
            .and_then(|t| t.strip_prefix('/'))
            .unwrap_or(topic)
    }

    /// Queues the subscription without waiting, since the caller is usually the
    /// event loop that drains the queue.
    pub fn subscribe(&self, events: &[String]) -> Result<(), rumqttc::ClientError> {
        self.client.try_subscribe_many(
            events
                .iter()
                .map(|event| SubscribeFilter::new(self.mesh_topic(event), QoS::AtMostOnce)),
        )
    }

    /// Drives the connection, forwarding every incoming publish as a [`MeshEvent`].
    /// Subscriptions to `events` are (re)made on each connection acknowledgement.
    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        events: Vec<String>,
        tx: broadcast::Sender<MeshEvent>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, p.payload);
                        let event = mesh_event(self.event_name(&p.topic), &p.payload);
                        // No receivers just means nobody is listening yet
                        if let Err(err) = tx.send(event) {
                            debug!("Dropping mesh event: {:?}", err);
                        }
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        info!("Connected to MQTT broker as {}", self.publisher_id);
                        if !events.is_empty() {
                            if let Err(err) = self.subscribe(&events) {
                                error!("Error subscribing to MQTT topics: {:?}", err);
                            }
                        }
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

fn mesh_event(name: &str, payload: &[u8]) -> MeshEvent {
    MeshEvent {
        name: name.to_string(),
        data: if payload.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(payload).into_owned())
        },
    }
}

fn cloud_payload(publisher_id: &str, event: &str, data: &str, visibility: Visibility) -> String {
    let envelope = CloudEnvelope {
        name: event,
        data,
        ttl: CLOUD_EVENT_TTL_SECONDS,
        publisher_id,
        private: visibility == Visibility::Private,
    };
    serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string())
}

/// Publishes raw payloads to `{topic_path}/{event}`.
#[derive(Debug, Clone)]
pub struct MeshPublisher(pub MqttClient);

impl Publisher for MeshPublisher {
    async fn publish(&self, event: &str, data: &str) -> Result<(), rumqttc::ClientError> {
        debug!("Publishing mesh event {event}: {data}");
        self.0
            .client
            .try_publish(self.0.mesh_topic(event), QoS::AtMostOnce, false, data.to_string())
    }
}

/// Publishes JSON envelopes to `{topic_path}/{publisher_id}/{event}`.
#[derive(Debug, Clone)]
pub struct CloudPublisher {
    pub client: MqttClient,
    pub visibility: Visibility,
}

impl Publisher for CloudPublisher {
    async fn publish(&self, event: &str, data: &str) -> Result<(), rumqttc::ClientError> {
        info!("Publishing cloud event {event} ({:?}): {data}", self.visibility);
        let payload = cloud_payload(&self.client.publisher_id, event, data, self.visibility);
        let qos = match self.visibility {
            Visibility::Private => QoS::AtLeastOnce,
            Visibility::Public => QoS::AtMostOnce,
        };
        self.client
            .client
            .try_publish(self.client.cloud_topic(event), qos, false, payload)
    }
}

fn sanitize_name(name: &str) -> String {
    // Remove any non-alphanumeric characters and replace spaces with underscores
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}
