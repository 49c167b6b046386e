//! Client-side control link for the UnoQ animatronic pet controller
//!
//! This crate provides an async API for teleoperating a servo/stepper
//! animatronic over a persistent WebSocket session. It supports:
//!
//! - Connection lifecycle management with a bounded bootstrap handshake
//! - Local mirrors of the controller's angle set, shared state, and roster
//! - Per-actuator leading-and-trailing command throttling
//! - Typed events for every state transition and inbound update
//! - Shared-state proposals confirmed by the controller
//!
//! # Quick Start
//!
//! ```no_run
//! use petlink::{ActuatorKind, DeviceLinkClient, EventKind, LinkConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = DeviceLinkClient::new(LinkConfig::default());
//!
//!     client.on(EventKind::Angles, |event| {
//!         println!("angles update: {:?}", event);
//!     });
//!
//!     client.connect(Some("pet.local:8765")).await?;
//!
//!     // Wag the tail: rapid writes are throttled per actuator.
//!     for angle in [40.0, 80.0, 120.0, 80.0, 40.0] {
//!         client.set_angle(ActuatorKind::Servo, 0, angle, false)?;
//!         tokio::time::sleep(std::time::Duration::from_millis(10)).await;
//!     }
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod link;

pub use config::AppConfig;
pub use link::{
    ActuatorKind, AngleSet, ConnectionState, DeviceLinkClient, EventKind, LinkConfig, LinkError,
    LinkEvent, RawAngleSet, SharedState, Transport, WsTransport,
};
