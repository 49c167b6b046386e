//! Wire protocol for the UnoQ control channel
//!
//! Frames are JSON objects of the form `{"event": <name>, "data": <payload>}`.
//! Event and command names must stay bit-exact for interoperability with the
//! deployed controller firmware — do not rename variants without a firmware
//! rollout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ActuatorKind, AngleSet, SharedState};

/// Outbound command frame (client → controller)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum Command {
    /// Request the full roster; replied to with `clients`
    GetClients {},
    /// Request the full shared state; replied to with `state`
    GetState {},
    /// Request the full angle set; replied to with `angles`
    GetAngles {},
    /// Propose a wholesale state replacement (the controller decides the merge)
    SetState(SharedState),
    /// Propose an incremental state patch; echoed back as a `state` update
    UpdateState(SharedState),
    /// Move one actuator
    SetAngle {
        #[serde(rename = "type")]
        kind: ActuatorKind,
        index: usize,
        angle: i32,
    },
    /// Move every actuator atomically
    SetAngles(AngleSet),
    /// Re-zero one actuator
    TareAngle {
        #[serde(rename = "type")]
        kind: ActuatorKind,
        index: usize,
    },
    /// Relay an arbitrary payload to all peers
    Broadcast(Value),
}

/// Inbound event frame (controller → client)
///
/// Transport-level connect/disconnect are surfaced by the transport layer,
/// not as frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Payload relayed from a peer
    Broadcast(Value),
    /// Authoritative full shared state
    State(SharedState),
    /// Incremental state patch; null values delete keys
    StateDiff(SharedState),
    /// Authoritative full angle set (also the reply to `getAngles`)
    Angles(AngleSet),
    /// One client joined the session
    ClientJoin { client: String },
    /// One client left the session
    ClientExit { client: String },
    /// Full roster refresh (also the reply to `getClients`)
    Clients(Vec<String>),
}
