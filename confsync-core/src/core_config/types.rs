/*
    types.rs - Wire units and results passed around the sync core
*/

use crate::core_config::variant::{ConfigVariant, Namespace};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A configuration message, outbound or received from the swarm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedConfigMessage {
    pub kind: ConfigVariant,
    pub seq_no: i64,
    pub data: Vec<u8>,
    /// Sender timestamp, known for received messages
    pub sent_timestamp_ms: Option<i64>,
    /// Hash the swarm assigned when it stored the message
    pub server_hash: Option<String>,
}

impl SharedConfigMessage {
    pub fn outgoing(kind: ConfigVariant, seq_no: i64, data: Vec<u8>) -> Self {
        SharedConfigMessage {
            kind,
            seq_no,
            data,
            sent_timestamp_ms: Some(now_ms()),
            server_hash: None,
        }
    }

    pub fn received(
        kind: ConfigVariant,
        seq_no: i64,
        data: Vec<u8>,
        server_hash: impl Into<String>,
        sent_timestamp_ms: i64,
    ) -> Self {
        SharedConfigMessage {
            kind,
            seq_no,
            data,
            sent_timestamp_ms: Some(sent_timestamp_ms),
            server_hash: Some(server_hash.into()),
        }
    }
}

/// One variant's pending push
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingConfResult {
    pub message: SharedConfigMessage,
    pub namespace: Namespace,
    /// Server hashes that become obsolete once this push is stored
    pub obsolete_hashes: Vec<String>,
}

/// Outcome of merging one variant's incoming batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfResult {
    pub needs_push: bool,
    pub needs_dump: bool,
    pub message_hashes: Vec<String>,
    pub latest_sent_timestamp_ms: Option<i64>,
}

/// What a config object hands back from `push()`
#[derive(Debug, Clone, PartialEq)]
pub struct PushData {
    pub payload: Vec<u8>,
    pub seq_no: i64,
    pub obsolete_hashes: Vec<String>,
}

/// Persisted snapshot of a config object
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDump {
    pub variant: ConfigVariant,
    pub public_key: String,
    pub data: Vec<u8>,
    pub timestamp_ms: i64,
}

/// Milliseconds since the unix epoch
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
