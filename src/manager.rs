use std::time::Duration;

use anyhow::Context as _;
use log::{info, warn};
use tokio::sync::broadcast;

use crate::config::{AppConfig, ReaderConfig, ReaderSource};
use crate::gateway::Gateway;
use crate::mqtt::{CloudPublisher, MeshPublisher, MqttClient};
use crate::rfid::{ScriptedReader, TagReader};
use crate::scanner::Scanner;

pub struct Manager {
    config: AppConfig,
}

/// Keeps an MQTT connection alive in the background, forwarding publishes on `events`.
fn spawn_event_loop(
    client: &MqttClient,
    mut eventloop: rumqttc::EventLoop,
    events: Vec<String>,
    tx: broadcast::Sender<crate::messages::MeshEvent>,
) {
    let client = client.clone();
    tokio::task::spawn(async move {
        client.event_loop(&mut eventloop, events, tx).await;
    });
}

async fn scan_until_shutdown<R: TagReader>(mut scanner: Scanner<R, MeshPublisher>) {
    tokio::select! {
        _ = scanner.run() => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping reader"),
    }
}

#[cfg(target_os = "linux")]
fn open_mfrc522(
    config: &ReaderConfig,
) -> anyhow::Result<crate::mfrc522::Mfrc522<linux_embedded_hal::SpidevDevice>> {
    use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};

    let mut spi = linux_embedded_hal::SpidevDevice::open(config.spi_device())
        .map_err(|e| anyhow::anyhow!("opening {}: {:?}", config.spi_device(), e))?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(config.spi_speed_hz())
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    spi.configure(&options)
        .with_context(|| format!("configuring {}", config.spi_device()))?;

    let mut reader = crate::mfrc522::Mfrc522::new(spi);
    reader
        .init()
        .map_err(|e| anyhow::anyhow!("initialising MFRC522: {e}"))?;
    match reader.version() {
        Ok(version) => info!("MFRC522 version {:#04x}", version),
        Err(e) => warn!("Could not read MFRC522 version: {e}"),
    }
    Ok(reader)
}

#[cfg(not(target_os = "linux"))]
fn open_mfrc522(_config: &ReaderConfig) -> anyhow::Result<ScriptedReader> {
    anyhow::bail!("the mfrc522 reader source needs Linux spidev; use source = \"script\"")
}

impl Manager {
    pub fn new(config: AppConfig) -> Self {
        Manager { config }
    }

    pub async fn run_reader(self) -> anyhow::Result<()> {
        let reader_config = self.config.reader.clone().unwrap_or_default();

        let (mqtt_client, eventloop) = MqttClient::new(&self.config.mesh, "tag-reader", "mesh");
        // Nothing is subscribed, the receiving side is dropped right away
        let (tx, _) = broadcast::channel(1);
        spawn_event_loop(&mqtt_client, eventloop, Vec::new(), tx);

        let publisher = MeshPublisher(mqtt_client.clone());
        let hex_style = reader_config.hex_style.unwrap_or_default();
        let poll_interval = Duration::from_millis(reader_config.poll_interval_ms());

        match reader_config.source() {
            ReaderSource::Script => {
                let path = reader_config
                    .script
                    .as_ref()
                    .context("reader.script is required when source = \"script\"")?;
                let reader =
                    ScriptedReader::from_file(path, reader_config.script_loop.unwrap_or(false))?;
                info!("Replaying tags from {}", path.display());
                scan_until_shutdown(Scanner::new(reader, publisher, hex_style, poll_interval))
                    .await;
            }
            ReaderSource::Mfrc522 => {
                let reader = open_mfrc522(&reader_config)?;
                info!("Polling MFRC522 on {}", reader_config.spi_device());
                scan_until_shutdown(Scanner::new(reader, publisher, hex_style, poll_interval))
                    .await;
            }
        }

        mqtt_client.disconnect().await?;
        Ok(())
    }

    pub async fn run_gateway(self) -> anyhow::Result<()> {
        let gateway_config = self.config.gateway.clone().unwrap_or_default();
        let cloud_config = self
            .config
            .cloud
            .as_ref()
            .context("a [cloud] section is required to run the gateway")?;

        let (mesh_client, mesh_eventloop) =
            MqttClient::new(&self.config.mesh, "tag-gateway-mesh", "mesh");
        let (cloud_client, cloud_eventloop) =
            MqttClient::new(cloud_config, "tag-gateway", "events");

        let (tx, rx) = broadcast::channel(10);
        spawn_event_loop(
            &mesh_client,
            mesh_eventloop,
            vec![gateway_config.event().to_string()],
            tx,
        );
        let (cloud_tx, _) = broadcast::channel(1);
        spawn_event_loop(&cloud_client, cloud_eventloop, Vec::new(), cloud_tx);

        let gateway = Gateway::new(
            CloudPublisher {
                client: cloud_client.clone(),
                visibility: gateway_config.visibility.unwrap_or_default(),
            },
            gateway_config.event(),
            gateway_config.cloud_event(),
        );
        info!(
            "Relaying mesh event {} to cloud event {}",
            gateway_config.event(),
            gateway_config.cloud_event()
        );

        tokio::select! {
            _ = gateway.run(rx) => info!("Mesh event stream closed"),
            _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping gateway"),
        }

        mesh_client.disconnect().await?;
        cloud_client.disconnect().await?;
        Ok(())
    }
}
