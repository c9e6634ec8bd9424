use std::path::PathBuf;

use serde_derive::Deserialize;

use crate::messages::{GAMESETTING_EVENT, HexStyle, NFC_TAG_EVENT, Visibility};

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mesh: MqttConfig,
    pub cloud: Option<MqttConfig>,
    pub reader: Option<ReaderConfig>,
    pub gateway: Option<GatewayConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReaderSource {
    /// MFRC522 attached to a Linux spidev device.
    #[default]
    Mfrc522,
    /// Replay tag readings from a text file.
    Script,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ReaderConfig {
    pub source: Option<ReaderSource>,
    pub spi_device: Option<String>,
    pub spi_speed_hz: Option<u32>,
    pub script: Option<PathBuf>,
    pub script_loop: Option<bool>,
    pub poll_interval_ms: Option<u64>,
    pub hex_style: Option<HexStyle>,
}

impl ReaderConfig {
    pub fn source(&self) -> ReaderSource {
        self.source.unwrap_or_default()
    }

    pub fn spi_device(&self) -> &str {
        self.spi_device.as_deref().unwrap_or("/dev/spidev0.0")
    }

    pub fn spi_speed_hz(&self) -> u32 {
        self.spi_speed_hz.unwrap_or(1_000_000)
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms.unwrap_or(1000)
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct GatewayConfig {
    pub event: Option<String>,
    pub cloud_event: Option<String>,
    pub visibility: Option<Visibility>,
}

impl GatewayConfig {
    pub fn event(&self) -> &str {
        self.event.as_deref().unwrap_or(NFC_TAG_EVENT)
    }

    pub fn cloud_event(&self) -> &str {
        self.cloud_event.as_deref().unwrap_or(GAMESETTING_EVENT)
    }
}
