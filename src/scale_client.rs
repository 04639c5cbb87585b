use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::parse::decode_current_time;
use crate::protocol::{Target, SCALE_NAME_PREFIXES};
use crate::session::{Effect, Event, Session, SessionConfig, SessionState, DEFAULT_INACTIVITY_TIMEOUT};
use crate::transport::{DiscoveredDevice, Notification, Transport};
use crate::types::{ScaleEvent, UserProfile};

/// How long [`ScaleClient::teardown`] waits for a session task to stop.
pub const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

// ── ScaleClientConfig ─────────────────────────────────────────────────────────

/// Configuration for [`ScaleClient`].
#[derive(Debug, Clone)]
pub struct ScaleClientConfig {
    /// BLE scan duration in seconds. Default: `15`.
    pub scan_timeout_secs: u64,
    /// Match devices whose advertised name starts with one of these.
    /// Default: `["MIBFS", "MIBCS"]`.
    pub name_prefixes: Vec<String>,
    /// Disconnect when the scale stays silent this long. Default: 60 s.
    pub inactivity_timeout: Duration,
    /// Hard limit on `connect()`; some stacks block forever on an
    /// out-of-range device. Default: 10 s.
    pub connect_timeout: Duration,
    /// Write the host clock to the scale before the handshake.
    /// Default: `false`.
    pub sync_clock: bool,
}

impl Default for ScaleClientConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 15,
            name_prefixes: SCALE_NAME_PREFIXES.iter().map(|p| p.to_string()).collect(),
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            sync_clock: false,
        }
    }
}

impl ScaleClientConfig {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            inactivity_timeout: self.inactivity_timeout,
            sync_clock: self.sync_clock,
        }
    }
}

// ── ScaleClient ───────────────────────────────────────────────────────────────

/// Scans for scales and runs one protocol [`Session`] at a time.
///
/// Connecting or scanning again tears the previous session down first
/// (timer, notification task, link).
pub struct ScaleClient<T: Transport + 'static> {
    config: ScaleClientConfig,
    transport: Arc<T>,
    current: Option<(ScaleHandle, JoinHandle<()>)>,
}

impl<T: Transport + 'static> ScaleClient<T> {
    pub fn new(transport: T, config: ScaleClientConfig) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            current: None,
        }
    }

    pub fn config(&self) -> &ScaleClientConfig {
        &self.config
    }

    /// Scan for `scan_timeout_secs` and return every matching scale.
    pub async fn scan_all(&mut self) -> Result<Vec<DiscoveredDevice>> {
        self.teardown().await;
        let found = self
            .transport
            .scan(
                Duration::from_secs(self.config.scan_timeout_secs),
                &self.config.name_prefixes,
            )
            .await?;
        info!("scan_all: {} scale(s) found", found.len());
        Ok(found)
    }

    /// Scan, then connect to the first matching scale.
    pub async fn connect(
        &mut self,
        profile: UserProfile,
    ) -> Result<(mpsc::Receiver<ScaleEvent>, ScaleHandle)> {
        let device = self
            .scan_all()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                anyhow!(
                    "no scale found after {} s scanning",
                    self.config.scan_timeout_secs
                )
            })?;
        self.connect_to(device, profile).await
    }

    /// Connect to a device from [`ScaleClient::scan_all`], discover services,
    /// and start the handshake on a background task.
    ///
    /// Returns the event receiver and a [`ScaleHandle`] for the session.
    pub async fn connect_to(
        &mut self,
        device: DiscoveredDevice,
        profile: UserProfile,
    ) -> Result<(mpsc::Receiver<ScaleEvent>, ScaleHandle)> {
        self.teardown().await;

        let transport = Arc::clone(&self.transport);
        let connect_timeout = self.config.connect_timeout;
        tokio::time::timeout(connect_timeout, transport.connect(&device))
            .await
            .map_err(|_| anyhow!("BLE connect() timed out after {connect_timeout:?}"))?
            .with_context(|| format!("connecting to {}", device.name))?;

        tokio::time::timeout(Duration::from_secs(15), transport.discover_services())
            .await
            .map_err(|_| anyhow!("discover_services() timed out after 15 s"))??;
        info!("Connected and services discovered: {}", device.name);

        let notifications = transport.notifications().await?;

        let (tx, rx) = mpsc::channel::<ScaleEvent>(64);
        let _ = tx.send(ScaleEvent::Connected(device.name.clone())).await;

        let (control_tx, control_rx) = mpsc::channel::<Control>(8);
        let session = Session::new(profile, self.config.session_config());
        let driver = Driver {
            transport,
            session,
            notifications,
            control: control_rx,
            events: tx,
            deadline: None,
        };
        let task = tokio::spawn(driver.run());

        let handle = ScaleHandle {
            control: control_tx,
            device,
        };
        self.current = Some((handle.clone(), task));
        Ok((rx, handle))
    }

    /// `true` while a session is running and the link is up.
    pub async fn is_connected(&self) -> bool {
        match &self.current {
            Some((handle, _)) => handle.is_running() && self.transport.is_connected().await,
            None => false,
        }
    }

    /// Stop the running session, if any, and wait for its task to finish.
    ///
    /// A session blocked on a full event channel (receiver kept but not
    /// drained) is aborted after [`TEARDOWN_GRACE`] and the link dropped here.
    pub async fn teardown(&mut self) {
        let Some((handle, mut task)) = self.current.take() else {
            return;
        };
        debug!("tearing down session with {}", handle.device.name);
        handle.control.try_send(Control::Disconnect).ok();

        match tokio::time::timeout(TEARDOWN_GRACE, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("session task ended abnormally: {e}"),
            Err(_) => {
                warn!(
                    "session with {} did not stop within {TEARDOWN_GRACE:?}, aborting",
                    handle.device.name
                );
                task.abort();
                if let Err(e) = self.transport.disconnect().await {
                    warn!("disconnect failed: {e}");
                }
            }
        }
    }
}

// ── ScaleHandle ───────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Control {
    Disconnect,
    Rediscover,
    Read(Target, oneshot::Sender<Result<Vec<u8>>>),
}

/// A handle to a running session.
#[derive(Debug, Clone)]
pub struct ScaleHandle {
    control: mpsc::Sender<Control>,
    device: DiscoveredDevice,
}

impl ScaleHandle {
    pub fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    /// `false` once the session has ended for any reason.
    pub fn is_running(&self) -> bool {
        !self.control.is_closed()
    }

    /// End the session and drop the link.
    pub async fn disconnect(&self) -> Result<()> {
        self.control
            .send(Control::Disconnect)
            .await
            .map_err(|_| anyhow!("session already ended"))
    }

    /// Re-run service discovery and resume a handshake parked after a
    /// failed subscription.
    pub async fn rediscover(&self) -> Result<()> {
        self.control
            .send(Control::Rediscover)
            .await
            .map_err(|_| anyhow!("session already ended"))
    }

    /// Read the scale's clock from the current-time characteristic.
    pub async fn read_clock(&self) -> Result<NaiveDateTime> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(Control::Read(Target::CurrentTime, reply_tx))
            .await
            .map_err(|_| anyhow!("session already ended"))?;
        let bytes = reply_rx.await.map_err(|_| anyhow!("session ended before reply"))??;
        Ok(decode_current_time(&bytes)?)
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

/// Owns the session for one connection and executes its effects.
struct Driver<T: Transport> {
    transport: Arc<T>,
    session: Session,
    notifications: BoxStream<'static, Notification>,
    control: mpsc::Receiver<Control>,
    events: mpsc::Sender<ScaleEvent>,
    deadline: Option<Instant>,
}

impl<T: Transport> Driver<T> {
    async fn run(mut self) {
        let mut pending = VecDeque::from([Event::Connected]);

        loop {
            while let Some(event) = pending.pop_front() {
                for effect in self.session.handle(event) {
                    if let Some(follow_up) = self.apply(effect).await {
                        pending.push_back(follow_up);
                    }
                }
            }
            if self.session.state() == SessionState::Disconnected {
                break;
            }

            let deadline = self.deadline;
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                notif = self.notifications.next() => match notif {
                    Some(n) => {
                        debug!("notification from {:?}: {:02x?}", n.target, n.value);
                        pending.push_back(Event::DataReceived(n.value));
                    }
                    None => pending.push_back(Event::Disconnected),
                },
                _ = timer => {
                    self.deadline = None;
                    pending.push_back(Event::Timeout);
                }
                control = self.control.recv() => match control {
                    Some(Control::Read(target, reply)) => {
                        let result = self.transport.read(target).await.map_err(Into::into);
                        let _ = reply.send(result);
                    }
                    Some(Control::Rediscover) => match self.transport.discover_services().await {
                        Ok(()) => pending.push_back(Event::ServicesDiscovered),
                        Err(e) => self.status(format!("Service discovery failed: {e}")).await,
                    },
                    Some(Control::Disconnect) | None => {
                        info!("Disconnect requested");
                        if let Err(e) = self.transport.disconnect().await {
                            warn!("disconnect failed: {e}");
                        }
                        break;
                    }
                },
            }
        }

        self.control.close();
        let _ = self.events.send(ScaleEvent::Disconnected).await;
    }

    /// Carry out one effect; transport calls report back as a follow-up event.
    async fn apply(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::Write(cmd) => {
                let target = cmd.target;
                match self.transport.write(target, &cmd.bytes).await {
                    Ok(()) => Some(Event::WriteAcknowledged(target)),
                    Err(e) => Some(Event::WriteFailed {
                        target,
                        reason: e.to_string(),
                    }),
                }
            }
            Effect::EnableNotifications(target) => {
                match self.transport.enable_notifications(target).await {
                    Ok(()) => Some(Event::NotificationEnabled(target)),
                    Err(e) => Some(Event::NotificationFailed {
                        target,
                        reason: e.to_string(),
                    }),
                }
            }
            Effect::ArmTimer(after) => {
                self.deadline = Some(Instant::now() + after);
                None
            }
            Effect::CancelTimer => {
                self.deadline = None;
                None
            }
            Effect::Disconnect => {
                if let Err(e) = self.transport.disconnect().await {
                    warn!("disconnect failed: {e}");
                }
                None
            }
            Effect::Measurement(m) => {
                let _ = self.events.send(ScaleEvent::Measurement(m)).await;
                None
            }
            Effect::Status(message) => {
                self.status(message).await;
                None
            }
        }
    }

    async fn status(&mut self, message: String) {
        info!("{message}");
        let _ = self.events.send(ScaleEvent::Status(message)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use futures::stream;

    fn assert_send<F: std::future::Future + Send>(_: &F) {}

    #[tokio::test]
    async fn test_driver_future_is_send() {
        let (events, _rx) = mpsc::channel(1);
        let (_control_tx, control) = mpsc::channel(1);
        let driver = Driver {
            transport: Arc::new(MockTransport::new()),
            session: Session::new(UserProfile::default(), SessionConfig::default()),
            notifications: stream::empty().boxed(),
            control,
            events,
            deadline: None,
        };
        let run = driver.run();
        assert_send(&run);
    }

    #[test]
    fn test_default_config() {
        let config = ScaleClientConfig::default();
        assert_eq!(config.scan_timeout_secs, 15);
        assert_eq!(config.name_prefixes, vec!["MIBFS", "MIBCS"]);
        assert_eq!(config.inactivity_timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(!config.sync_clock);
    }
}
