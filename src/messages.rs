use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};

/// Mesh event carrying the serial number of the tag in front of the reader.
pub const NFC_TAG_EVENT: &str = "nfc-tag";
/// Cloud event the gateway mirrors tag events to.
pub const GAMESETTING_EVENT: &str = "gamesetting";
/// Payload sent when no tag is present (or when a mesh event had no payload).
pub const NONE_SENTINEL: &str = "none";

/// Serial number bytes plus the trailing block check character.
pub const UID_LEN: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Uid([u8; UID_LEN]);

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HexStyle {
    /// Lowercase digits with no padding, so `0x0a` renders as `a`.
    Legacy,
    /// Two lowercase digits per byte.
    #[default]
    Padded,
}

impl Uid {
    pub const fn new(bytes: [u8; UID_LEN]) -> Self {
        Uid(bytes)
    }

    pub fn to_hex(&self, style: HexStyle) -> String {
        match style {
            HexStyle::Legacy => self.0.iter().map(|b| format!("{b:x}")).collect(),
            HexStyle::Padded => hex::encode(self.0),
        }
    }

    /// Console rendering: uppercase bytes separated by spaces.
    pub fn diagnostic(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{b:X}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(thiserror::Error, Debug, Clone)]
#[error("invalid tag uid {0:?}: {1}")]
pub struct ParseUidError(String, hex::FromHexError);

impl FromStr for Uid {
    type Err = ParseUidError;

    /// Parses the padded form: ten hex digits in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut bytes = [0u8; UID_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| ParseUidError(s.to_string(), e))?;
        Ok(Uid(bytes))
    }
}

/// An event received from the mesh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshEvent {
    pub name: String,
    pub data: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}
