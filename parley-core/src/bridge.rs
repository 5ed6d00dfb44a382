//! Wire protocol spoken with the messaging bridge sidecar.
//!
//! Frames are a 4-byte little-endian length prefix followed by a MessagePack
//! payload (named fields). Commands flow to the bridge, events flow back.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParleyError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Bind the bridge connection to one account and its on-disk session.
    Start {
        account_id: Uuid,
        session_dir: String,
    },
    SendText {
        to: String,
        body: String,
    },
    /// Release the client and its file handles.
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Qr {
        payload: String,
    },
    Ready {
        #[serde(default)]
        phone_number: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
    },
    AuthFailure {
        reason: String,
    },
    Disconnected {
        reason: String,
    },
    Error {
        message: String,
    },
    Message {
        from: String,
        body: String,
        #[serde(default)]
        push_name: Option<String>,
        #[serde(default)]
        message_id: Option<String>,
    },
}

pub fn encode_command(command: &BridgeCommand) -> Result<Vec<u8>, ParleyError> {
    Ok(rmp_serde::to_vec_named(command)?)
}

pub fn decode_command(bytes: &[u8]) -> Result<BridgeCommand, ParleyError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

pub fn encode_event(event: &BridgeEvent) -> Result<Vec<u8>, ParleyError> {
    Ok(rmp_serde::to_vec_named(event)?)
}

pub fn decode_event(bytes: &[u8]) -> Result<BridgeEvent, ParleyError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
