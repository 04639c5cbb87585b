//! # miscale-rs
//!
//! Async Rust library and CLI for reading weight and body-composition
//! measurements from the Xiaomi Mi Body Composition Scale 2 over Bluetooth
//! Low Energy.
//!
//! ## What you get
//!
//! | Field | Source |
//! |---|---|
//! | weight, timestamp | every stabilized packet |
//! | impedance | packets where the scale measured it (bare feet) |
//! | body fat, water, muscle, bone mass, visceral fat, lean body mass | derived from impedance and the [`types::UserProfile`] |
//!
//! On connect the client replays measurements the scale stored while no
//! phone was around, then keeps streaming live readings until the scale
//! stays quiet for the inactivity timeout.
//!
//! ## Quick start
//!
//! ```no_run
//! use miscale_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = BtleTransport::new().await?;
//!     let mut client = ScaleClient::new(transport, ScaleClientConfig::default());
//!     let (mut rx, _handle) = client.connect(UserProfile::default()).await?;
//!
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             ScaleEvent::Measurement(m) => println!("{:.2} kg at {}", m.weight_kg, m.timestamp),
//!             ScaleEvent::Disconnected => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`scale_client`] | Scanning, connecting, and the [`scale_client::ScaleHandle`] API |
//! | [`session`] | Transport-free handshake state machine |
//! | [`parse`] | 13-byte measurement packet decoder |
//! | [`body_composition`] | Body-fat, water, muscle, bone and visceral-fat estimates |
//! | [`protocol`] | GATT UUIDs and command builders |
//! | [`transport`] | The [`transport::Transport`] trait |
//! | [`btle`] | btleplug-backed transport |
//! | [`mock`] | In-memory transport for tests and `--simulate` |
//! | [`types`] | Profile, measurement and event types |
//! | [`error`] | Decode and transport errors |

pub mod body_composition;
pub mod btle;
pub mod error;
pub mod mock;
pub mod parse;
pub mod protocol;
pub mod scale_client;
pub mod session;
pub mod transport;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Client ────────────────────────────────────────────────────────────────
    pub use crate::btle::BtleTransport;
    pub use crate::mock::MockTransport;
    pub use crate::scale_client::{ScaleClient, ScaleClientConfig, ScaleHandle};
    pub use crate::transport::{DiscoveredDevice, Transport};

    // ── Events and data types ─────────────────────────────────────────────────
    pub use crate::types::{Gender, ScaleEvent, ScaleMeasurement, UserProfile, WeightUnit};

    // ── Errors ────────────────────────────────────────────────────────────────
    pub use crate::error::{DecodeError, TransportError};
}
