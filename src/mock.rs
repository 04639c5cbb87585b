//! In-memory [`Transport`] that behaves like a Mi Body Composition Scale 2.
//!
//! Used by the test suite and by `miscale --simulate`.  Clones share state,
//! so a test can keep one clone to inspect writes and inject notifications
//! while the client drives the other.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::parse::RawPacket;
use crate::protocol::{encode_set_time, Target, STOP_MARKER};
use crate::transport::{DiscoveredDevice, Notification, Transport};

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<DiscoveredDevice>,
    connected: Option<String>,
    /// Packets replayed after a history request, followed by the stop marker.
    history: Vec<Vec<u8>>,
    writes: Vec<(Target, Vec<u8>)>,
    subscriptions: Vec<Target>,
    clock: Vec<u8>,
    fail_writes_to: Option<Target>,
    fail_notifications_on: Option<Target>,
    notify_tx: Option<mpsc::UnboundedSender<Notification>>,
    connects: usize,
    disconnects: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// One scale in range with two stored weighings (one with impedance).
    pub fn with_sample_data() -> Self {
        let now = Local::now().naive_local();
        let earlier = now - chrono::Duration::hours(20);
        Self::new()
            .with_device("MIBFS", "C8:47:8C:00:00:01")
            .with_history(vec![
                RawPacket::stabilized(earlier, 14120).with_impedance(482).to_bytes().to_vec(),
                RawPacket::stabilized(now, 14000).to_bytes().to_vec(),
            ])
    }

    pub fn with_device(self, name: &str, id: &str) -> Self {
        self.lock().devices.push(DiscoveredDevice {
            name: name.into(),
            id: id.into(),
            rssi: Some(-58),
        });
        self
    }

    pub fn with_history(self, packets: Vec<Vec<u8>>) -> Self {
        self.lock().history = packets;
        self
    }

    pub fn failing_writes_to(self, target: Target) -> Self {
        self.lock().fail_writes_to = Some(target);
        self
    }

    pub fn failing_notifications_on(self, target: Target) -> Self {
        self.lock().fail_notifications_on = Some(target);
        self
    }

    /// Let previously failing writes and subscriptions succeed again.
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_writes_to = None;
        state.fail_notifications_on = None;
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> Vec<(Target, Vec<u8>)> {
        self.lock().writes.clone()
    }

    pub fn subscriptions(&self) -> Vec<Target> {
        self.lock().subscriptions.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    /// Deliver a notification as if the scale had sent it.  Returns `false`
    /// when nothing is listening.
    pub fn push_notification(&self, target: Target, value: Vec<u8>) -> bool {
        match &self.lock().notify_tx {
            Some(tx) => tx.send(Notification { target, value }).is_ok(),
            None => false,
        }
    }

    /// Simulate the scale powering off: the notification stream ends.
    pub fn drop_link(&self) {
        let mut state = self.lock();
        state.connected = None;
        state.notify_tx = None;
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panic while holding the lock only happens inside a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require_connected(state: &MockState) -> Result<(), TransportError> {
        match state.connected {
            Some(_) => Ok(()),
            None => Err(TransportError::ConnectFailed("not connected".into())),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn scan(
        &self,
        _duration: Duration,
        name_prefixes: &[String],
    ) -> Result<Vec<DiscoveredDevice>, TransportError> {
        Ok(self
            .lock()
            .devices
            .iter()
            .filter(|d| name_prefixes.iter().any(|p| d.name.starts_with(p.as_str())))
            .cloned()
            .collect())
    }

    async fn connect(&self, device: &DiscoveredDevice) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.devices.iter().any(|d| d.id == device.id) {
            return Err(TransportError::DeviceNotFound);
        }
        state.connected = Some(device.id.clone());
        state.connects += 1;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.connected.take().is_some() {
            state.disconnects += 1;
        }
        state.notify_tx = None;
        state.subscriptions.clear();
        Ok(())
    }

    async fn discover_services(&self) -> Result<(), TransportError> {
        Self::require_connected(&self.lock())
    }

    async fn write(&self, target: Target, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        Self::require_connected(&state)?;
        if state.fail_writes_to == Some(target) {
            return Err(TransportError::WriteFailed("GATT error 0x85".into()));
        }
        state.writes.push((target, bytes.to_vec()));

        match target {
            Target::CurrentTime => state.clock = bytes.to_vec(),
            Target::History if bytes == [0x02] => {
                if let Some(tx) = &state.notify_tx {
                    for packet in &state.history {
                        let _ = tx.send(Notification {
                            target: Target::History,
                            value: packet.clone(),
                        });
                    }
                    let _ = tx.send(Notification {
                        target: Target::History,
                        value: vec![STOP_MARKER],
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn read(&self, target: Target) -> Result<Vec<u8>, TransportError> {
        let state = self.lock();
        Self::require_connected(&state)?;
        match target {
            Target::CurrentTime if !state.clock.is_empty() => Ok(state.clock.clone()),
            Target::CurrentTime => Ok(encode_set_time(Local::now().naive_local()).bytes),
            other => Err(TransportError::ReadFailed(format!("{other:?} is not readable"))),
        }
    }

    async fn enable_notifications(&self, target: Target) -> Result<(), TransportError> {
        let mut state = self.lock();
        Self::require_connected(&state)?;
        if state.fail_notifications_on == Some(target) {
            return Err(TransportError::Other("descriptor write rejected".into()));
        }
        state.subscriptions.push(target);
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>, TransportError> {
        let mut state = self.lock();
        Self::require_connected(&state)?;
        let (tx, rx) = mpsc::unbounded_channel();
        state.notify_tx = Some(tx);
        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|n| (n, rx)) }).boxed())
    }

    async fn is_connected(&self) -> bool {
        self.lock().connected.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes() -> Vec<String> {
        vec!["MIBFS".into()]
    }

    #[tokio::test]
    async fn test_scan_filters_by_prefix() {
        let mock = MockTransport::new()
            .with_device("MIBFS", "a")
            .with_device("Other", "b");
        let found = mock.scan(Duration::ZERO, &prefixes()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[tokio::test]
    async fn test_connect_unknown_device() {
        let mock = MockTransport::new();
        let device = DiscoveredDevice {
            name: "MIBFS".into(),
            id: "nope".into(),
            rssi: None,
        };
        assert_eq!(
            mock.connect(&device).await,
            Err(TransportError::DeviceNotFound)
        );
    }

    #[tokio::test]
    async fn test_history_request_replays_then_stops() {
        let mock = MockTransport::with_sample_data();
        let device = mock.scan(Duration::ZERO, &prefixes()).await.unwrap().remove(0);
        mock.connect(&device).await.unwrap();
        let mut notifications = mock.notifications().await.unwrap();
        mock.write(Target::History, &[0x02]).await.unwrap();

        let first = notifications.next().await.unwrap();
        assert_eq!(first.value.len(), 13);
        let second = notifications.next().await.unwrap();
        assert_eq!(second.value.len(), 13);
        let last = notifications.next().await.unwrap();
        assert_eq!(last.value, vec![STOP_MARKER]);
    }

    #[tokio::test]
    async fn test_drop_link_ends_stream() {
        let mock = MockTransport::with_sample_data();
        let device = mock.scan(Duration::ZERO, &prefixes()).await.unwrap().remove(0);
        mock.connect(&device).await.unwrap();
        let mut notifications = mock.notifications().await.unwrap();
        mock.drop_link();
        assert!(notifications.next().await.is_none());
        assert!(!mock.is_connected().await);
    }
}
