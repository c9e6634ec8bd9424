use std::time::Duration;

use log::{debug, error, info, warn};

use crate::messages::{HexStyle, NFC_TAG_EVENT, NONE_SENTINEL, Uid};
use crate::mqtt::Publisher;
use crate::rfid::TagReader;

/// Decides what, if anything, to announce for each poll result.
#[derive(Debug, Default)]
pub struct ScanState {
    /// Set once `none` went out for the current absence streak.
    none_sent: bool,
    hex_style: HexStyle,
}

impl ScanState {
    pub fn new(hex_style: HexStyle) -> Self {
        ScanState {
            none_sent: false,
            hex_style,
        }
    }

    /// Every detection is announced; absence is announced once per streak.
    pub fn observe(&mut self, reading: Option<Uid>) -> Option<String> {
        match reading {
            Some(uid) => {
                self.none_sent = false;
                Some(uid.to_hex(self.hex_style))
            }
            None if self.none_sent => None,
            None => {
                self.none_sent = true;
                Some(NONE_SENTINEL.to_string())
            }
        }
    }
}

pub struct Scanner<R, P> {
    reader: R,
    publisher: P,
    state: ScanState,
    poll_interval: Duration,
}

impl<R: TagReader, P: Publisher> Scanner<R, P> {
    pub fn new(reader: R, publisher: P, hex_style: HexStyle, poll_interval: Duration) -> Self {
        Scanner {
            reader,
            publisher,
            state: ScanState::new(hex_style),
            poll_interval,
        }
    }

    fn read(&mut self) -> Result<Option<Uid>, R::Error> {
        let present = match self.reader.is_card() {
            Ok(present) => present,
            Err(err) => {
                warn!("Error polling tag reader: {:?}", err);
                false
            }
        };
        if !present {
            debug!("Card NOT detected");
            return Ok(None);
        }
        let uid = self.reader.read_card_serial()?;
        info!("Card detected: {}", uid.diagnostic());
        Ok(Some(uid))
    }

    /// One poll of the reader; returns the payload published, if any.
    pub async fn poll_once(&mut self) -> Option<String> {
        let reading = match self.read() {
            Ok(reading) => reading,
            Err(err) => {
                error!("Error reading tag serial: {:?}", err);
                return None;
            }
        };

        let payload = self.state.observe(reading)?;
        if let Err(err) = self.publisher.publish(NFC_TAG_EVENT, &payload).await {
            error!("Error publishing {}: {:?}", NFC_TAG_EVENT, err);
        }
        Some(payload)
    }

    pub async fn run(&mut self) {
        while !self.reader.exhausted() {
            self.poll_once().await;
            tokio::time::sleep(self.poll_interval).await;
        }
        info!("Tag source exhausted");
    }
}
