//! The seam between the protocol core and a Bluetooth stack.
//!
//! [`crate::btle::BtleTransport`] implements it on top of btleplug and
//! [`crate::mock::MockTransport`] implements it in memory.  Asynchronous
//! acknowledgments are modelled as the `Ok`/`Err` of each call; inbound
//! notifications arrive on the stream returned by [`Transport::notifications`],
//! which ends when the link drops.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::TransportError;
use crate::protocol::Target;

/// A scale found during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Advertised name (e.g. `"MIBFS"`).
    pub name: String,
    /// Platform identifier: a MAC address on Linux/Windows, a CoreBluetooth
    /// UUID on macOS.
    pub id: String,
    pub rssi: Option<i16>,
}

/// One inbound notification, already routed to the characteristic it came
/// from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub target: Target,
    pub value: Vec<u8>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Scan for `duration` and return every device whose advertised name
    /// starts with one of `name_prefixes`.
    async fn scan(
        &self,
        duration: Duration,
        name_prefixes: &[String],
    ) -> Result<Vec<DiscoveredDevice>, TransportError>;

    async fn connect(&self, device: &DiscoveredDevice) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn discover_services(&self) -> Result<(), TransportError>;

    /// Write with response; `Ok` means the peripheral acknowledged.
    async fn write(&self, target: Target, bytes: &[u8]) -> Result<(), TransportError>;

    async fn read(&self, target: Target) -> Result<Vec<u8>, TransportError>;

    /// Subscribe; `Ok` means the descriptor write was acknowledged.
    async fn enable_notifications(&self, target: Target) -> Result<(), TransportError>;

    /// Notifications from every subscribed characteristic of the connected
    /// device.  The stream ends when the link is lost.
    async fn notifications(&self) -> Result<BoxStream<'static, Notification>, TransportError>;

    async fn is_connected(&self) -> bool;
}
