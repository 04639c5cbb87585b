//! [`Transport`] implementation backed by btleplug.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex};

use crate::error::TransportError;
use crate::protocol::Target;
use crate::transport::{DiscoveredDevice, Notification, Transport};

/// BLE transport over the first adapter the platform reports.
pub struct BtleTransport {
    adapter: Adapter,
    /// Peripherals seen in the most recent scan, keyed by platform id.
    discovered: Mutex<HashMap<String, Peripheral>>,
    connected: Mutex<Option<Peripheral>>,
}

impl BtleTransport {
    /// Open the first Bluetooth adapter.
    ///
    /// On macOS, `CBCentralManager` needs a moment to reach the *poweredOn*
    /// state after initialisation; we wait up to 3 s for that.
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::AdapterNotFound)?;

        #[cfg(target_os = "macos")]
        {
            use btleplug::api::CentralState;

            let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
            loop {
                match adapter.adapter_state().await {
                    Ok(CentralState::PoweredOn) => break,
                    Ok(state) if tokio::time::Instant::now() >= deadline => {
                        warn!("macOS: adapter still in state {state:?} after 3 s, proceeding anyway");
                        break;
                    }
                    Ok(state) => debug!("macOS: adapter state = {state:?}, waiting…"),
                    Err(e) => {
                        warn!("macOS: adapter_state() error: {e}");
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        Ok(Self {
            adapter,
            discovered: Mutex::new(HashMap::new()),
            connected: Mutex::new(None),
        })
    }

    async fn peripheral(&self) -> Result<Peripheral, TransportError> {
        self.connected
            .lock()
            .await
            .clone()
            .ok_or_else(|| TransportError::ConnectFailed("no device connected".into()))
    }

    async fn find_char(&self, target: Target) -> Result<(Peripheral, Characteristic), TransportError> {
        let peripheral = self.peripheral().await?;
        let found = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == target.characteristic() && c.service_uuid == target.service());
        match found {
            Some(c) => Ok((peripheral, c)),
            None if peripheral.services().iter().any(|s| s.uuid == target.service()) => {
                Err(TransportError::CharacteristicNotFound(target.characteristic()))
            }
            None => Err(TransportError::ServiceNotFound(target.service())),
        }
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn scan(
        &self,
        duration: Duration,
        name_prefixes: &[String],
    ) -> Result<Vec<DiscoveredDevice>, TransportError> {
        if let Ok(btleplug::api::CentralState::PoweredOff) = self.adapter.adapter_state().await {
            return Err(TransportError::AdapterDisabled);
        }

        info!("scan: scanning for {} s …", duration.as_secs());
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(duration).await;
        self.adapter.stop_scan().await.ok();

        let mut discovered = self.discovered.lock().await;
        discovered.clear();
        let mut found = vec![];
        for p in self.adapter.peripherals().await? {
            let Ok(Some(props)) = p.properties().await else {
                continue;
            };
            let Some(name) = props.local_name else {
                continue;
            };
            if name_prefixes.iter().any(|prefix| name.starts_with(prefix.as_str())) {
                let id = p.id().to_string();
                info!("scan: found {name}  id={id}");
                found.push(DiscoveredDevice {
                    name,
                    id: id.clone(),
                    rssi: props.rssi,
                });
                discovered.insert(id, p);
            }
        }
        info!("scan: {} device(s) found", found.len());
        Ok(found)
    }

    async fn connect(&self, device: &DiscoveredDevice) -> Result<(), TransportError> {
        let peripheral = self
            .discovered
            .lock()
            .await
            .get(&device.id)
            .cloned()
            .ok_or(TransportError::DeviceNotFound)?;

        peripheral
            .connect()
            .await
            .map_err(|e| match TransportError::from(e) {
                TransportError::Other(msg) => TransportError::ConnectFailed(msg),
                other => other,
            })?;
        *self.connected.lock().await = Some(peripheral);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(peripheral) = self.connected.lock().await.take() {
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn discover_services(&self) -> Result<(), TransportError> {
        let peripheral = self.peripheral().await?;

        // BlueZ reports the connection before its GATT cache is populated;
        // discovering too early returns an empty set.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        peripheral.discover_services().await?;
        Ok(())
    }

    async fn write(&self, target: Target, bytes: &[u8]) -> Result<(), TransportError> {
        let (peripheral, c) = self.find_char(target).await?;
        peripheral
            .write(&c, bytes, WriteType::WithResponse)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn read(&self, target: Target) -> Result<Vec<u8>, TransportError> {
        let (peripheral, c) = self.find_char(target).await?;
        peripheral
            .read(&c)
            .await
            .map_err(|e| TransportError::ReadFailed(e.to_string()))
    }

    async fn enable_notifications(&self, target: Target) -> Result<(), TransportError> {
        let (peripheral, c) = self.find_char(target).await?;
        peripheral.subscribe(&c).await?;
        Ok(())
    }

    /// Forward peripheral notifications and close the stream when the
    /// adapter reports the device gone, which is often faster than waiting
    /// for the notification stream itself to end.
    async fn notifications(&self) -> Result<BoxStream<'static, Notification>, TransportError> {
        let peripheral = self.peripheral().await?;
        let mut raw = peripheral.notifications().await?;
        let (tx, rx) = mpsc::channel::<Notification>(64);

        let forward = tokio::spawn(async move {
            while let Some(notif) = raw.next().await {
                match Target::from_characteristic(notif.uuid) {
                    Some(target) => {
                        if tx.send(Notification { target, value: notif.value }).await.is_err() {
                            break;
                        }
                    }
                    None => debug!("Unknown notification from {}", notif.uuid),
                }
            }
            info!("Notification stream ended – device disconnected.");
        });

        let peripheral_id = peripheral.id();
        match self.adapter.events().await {
            Ok(mut events) => {
                tokio::spawn(async move {
                    while let Some(event) = events.next().await {
                        if let CentralEvent::DeviceDisconnected(id) = event {
                            if id == peripheral_id {
                                info!("Disconnect watcher: device {id:?} disconnected.");
                                forward.abort();
                                break;
                            }
                        }
                    }
                });
            }
            Err(e) => warn!("Disconnect watcher: could not subscribe to adapter events: {e}"),
        }

        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|n| (n, rx)) }).boxed())
    }

    async fn is_connected(&self) -> bool {
        match self.peripheral().await {
            Ok(p) => p.is_connected().await.unwrap_or(false),
            Err(_) => false,
        }
    }
}
