use std::convert::Infallible;
use std::path::Path;

use anyhow::Context as _;

use crate::messages::{NONE_SENTINEL, Uid};

/// A peripheral that can tell whether a tag is in the field and read its serial.
pub trait TagReader {
    type Error: std::fmt::Debug;

    fn is_card(&mut self) -> Result<bool, Self::Error>;

    /// Only meaningful right after `is_card` returned true.
    fn read_card_serial(&mut self) -> Result<Uid, Self::Error>;

    /// Readers backed by a finite source stop the poll loop once they run dry.
    fn exhausted(&self) -> bool {
        false
    }
}

// Reading a tag can fail on the bus itself or in the exchange with the card.
// Bus errors only promise `Debug`, so they are formatted rather than chained.
#[derive(thiserror::Error, Debug)]
pub enum RfidError<E> {
    #[error("SPI error: {0:?}")]
    Spi(E),

    /// The reader timer expired without an answer.
    #[error("no tag answered")]
    NoTag,

    /// `ErrorReg` flagged a protocol, parity, buffer or collision problem.
    #[error("reader error register {0:#04x}")]
    Protocol(u8),

    #[error("tag serial failed its check byte")]
    Checksum,

    #[error("timed out waiting for the reader")]
    Timeout,

    #[error("unexpected answer length {0}")]
    BadLength(usize),
}

/// Replays tag readings from a script: one line per poll, either a ten digit
/// hex serial or `none`. Blank lines and `#` comments are skipped.
#[derive(Debug, Clone)]
pub struct ScriptedReader {
    steps: Vec<Option<Uid>>,
    position: usize,
    current: Option<Uid>,
    looping: bool,
}

impl ScriptedReader {
    pub fn parse(script: &str, looping: bool) -> anyhow::Result<Self> {
        let mut steps = Vec::new();
        for (n, line) in script.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.eq_ignore_ascii_case(NONE_SENTINEL) {
                steps.push(None);
            } else {
                let uid = line
                    .parse::<Uid>()
                    .with_context(|| format!("script line {}", n + 1))?;
                steps.push(Some(uid));
            }
        }
        Ok(ScriptedReader {
            steps,
            position: 0,
            current: None,
            looping,
        })
    }

    pub fn from_file(path: &Path, looping: bool) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading tag script {}", path.display()))?;
        Self::parse(&contents, looping)
    }
}

impl TagReader for ScriptedReader {
    type Error = RfidError<Infallible>;

    fn is_card(&mut self) -> Result<bool, Self::Error> {
        if self.looping && self.position >= self.steps.len() {
            self.position = 0;
        }
        self.current = self.steps.get(self.position).copied().flatten();
        self.position += 1;
        Ok(self.current.is_some())
    }

    fn read_card_serial(&mut self) -> Result<Uid, Self::Error> {
        self.current.ok_or(RfidError::NoTag)
    }

    fn exhausted(&self) -> bool {
        if self.looping {
            self.steps.is_empty()
        } else {
            self.position >= self.steps.len()
        }
    }
}
