use log::{debug, error, info};
use tokio::sync::broadcast;

use crate::messages::{MeshEvent, NONE_SENTINEL};
use crate::mqtt::Publisher;

/// Mirrors one mesh event onto the cloud.
pub struct Gateway<P> {
    publisher: P,
    event: String,
    cloud_event: String,
}

impl<P: Publisher> Gateway<P> {
    pub fn new(publisher: P, event: &str, cloud_event: &str) -> Self {
        Gateway {
            publisher,
            event: event.to_string(),
            cloud_event: cloud_event.to_string(),
        }
    }

    pub async fn handle(&self, event: &str, data: Option<&str>) {
        if event != self.event {
            debug!("Ignoring mesh event {event}");
            return;
        }
        let data = data.unwrap_or(NONE_SENTINEL);
        info!("{data}");
        if let Err(err) = self.publisher.publish(&self.cloud_event, data).await {
            error!("Error publishing {}: {:?}", self.cloud_event, err);
        }
    }

    pub async fn run(&self, mut rx: broadcast::Receiver<MeshEvent>) {
        loop {
            match rx.recv().await {
                Ok(MeshEvent { name, data }) => self.handle(&name, data.as_deref()).await,
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Receiver closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Receiver lagged, skipped {n} events");
                }
            }
        }
    }
}
