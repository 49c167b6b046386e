//! Device link module — connection lifecycle, state mirrors, throttled commands
//!
//! This module owns the link to the UnoQ controller: it keeps the local
//! mirrors of the remote angle set, shared state, and client roster in
//! sync with server pushes, throttles outbound control commands per
//! actuator, and dispatches typed events on every transition.

mod client;
mod error;
mod events;
mod protocol;
mod throttle;
mod transport;
mod types;

pub use client::{DeviceLinkClient, LinkConfig};
pub use error::LinkError;
pub use events::{EventBus, EventKind, LinkEvent, SubscriptionId};
pub use protocol::{Command, ServerEvent};
pub use throttle::Throttle;
pub use transport::{Transport, WsTransport};
pub use types::{
    sanitize_angle, ActuatorKind, AngleSet, ConnectionState, RawAngleSet, SharedState,
    SERVO_MAX_DEG, SERVO_MIN_DEG,
};
