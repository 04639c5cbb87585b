//! Handshake and history-transfer state machine for one scale connection.
//!
//! The session never touches the radio.  Each call to [`Session::handle`]
//! takes one transport event and returns the [`Effect`]s the driver must
//! carry out (writes, subscriptions, timer changes, published measurements),
//! so the whole step table can be exercised without hardware.
//!
//! # Handshake
//!
//! | Step | Action | Waits for |
//! |---|---|---|
//! | 0 | set display unit (config characteristic) | nothing |
//! | 1 | history-mode magic (history characteristic) | nothing |
//! | 2 | enable notifications on history | `NotificationEnabled(History)` |
//! | 3 | enable notifications on weight | `NotificationEnabled(Weight)` |
//! | 4 | user identifier, tag `0x01` | nothing |
//! | 5 | history request | `DataReceived` (terminal) |
//!
//! When the scale sends its stop marker (`0x03`) the session replies with a
//! stop acknowledgment followed by the user identifier with tag `0x04`.

use std::time::Duration;

use chrono::Local;
use log::{debug, info, warn};
use rand::Rng;

use crate::parse::{decode_measurement, Decoded};
use crate::protocol::{
    encode_history_mode_magic, encode_history_request, encode_set_time, encode_set_units,
    encode_stop_acknowledgment, encode_user_identifier, Command, Target, UserIdTag, STOP_MARKER,
};
use crate::types::{ScaleMeasurement, UserProfile};

/// Default inactivity deadline before the session forces a disconnect.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Disconnect when no data arrives for this long.  Default: 60 s.
    pub inactivity_timeout: Duration,
    /// Write the host clock to the scale before the handshake.
    /// Default: `false`.
    pub sync_clock: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            sync_clock: false,
        }
    }
}

// ── Steps ─────────────────────────────────────────────────────────────────────

/// One row of the handshake table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    SetUnits,
    HistoryMagic,
    EnableHistory,
    EnableWeight,
    ConfigureUser,
    RequestHistory,
}

impl Step {
    pub fn index(self) -> usize {
        self as usize
    }

    fn next(self) -> Option<Step> {
        match self {
            Step::SetUnits => Some(Step::HistoryMagic),
            Step::HistoryMagic => Some(Step::EnableHistory),
            Step::EnableHistory => Some(Step::EnableWeight),
            Step::EnableWeight => Some(Step::ConfigureUser),
            Step::ConfigureUser => Some(Step::RequestHistory),
            Step::RequestHistory => None,
        }
    }

    /// The subscription this step parks on, if any.
    fn awaited_notification(self) -> Option<Target> {
        match self {
            Step::EnableHistory => Some(Target::History),
            Step::EnableWeight => Some(Target::Weight),
            _ => None,
        }
    }
}

// ── State, events, effects ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, transport not yet connected.
    Idle,
    /// Parked on a step that waits for a subscription acknowledgment.
    Handshaking(Step),
    /// Step 5 done; streaming history and live packets.
    AwaitingHistory,
    /// Torn down by timeout or link loss.
    Disconnected,
}

/// Everything the transport (or the driver's timer) can tell the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    /// Informational only; no handshake step waits on a write.
    WriteAcknowledged(Target),
    WriteFailed { target: Target, reason: String },
    NotificationEnabled(Target),
    NotificationFailed { target: Target, reason: String },
    ServicesDiscovered,
    DataReceived(Vec<u8>),
    Timeout,
    Disconnected,
}

/// Work the driver carries out on behalf of the session, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Write(Command),
    EnableNotifications(Target),
    /// (Re)start the inactivity timer with this duration.
    ArmTimer(Duration),
    CancelTimer,
    Disconnect,
    Measurement(ScaleMeasurement),
    Status(String),
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Protocol state for exactly one connected scale.
///
/// Construct a fresh `Session` per connection; the user identifier is drawn
/// once at construction and stays fixed for the session's lifetime.
#[derive(Debug, Clone)]
pub struct Session {
    profile: UserProfile,
    config: SessionConfig,
    user_id: u16,
    state: SessionState,
}

impl Session {
    pub fn new(profile: UserProfile, config: SessionConfig) -> Self {
        let base: u16 = rand::thread_rng().gen_range(100..65534);
        let user_id = base.wrapping_add(profile.age);
        Self::with_user_id(profile, config, user_id)
    }

    /// Build a session with a fixed user identifier.
    pub fn with_user_id(profile: UserProfile, config: SessionConfig, user_id: u16) -> Self {
        Self {
            profile,
            config,
            user_id,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user_id(&self) -> u16 {
        self.user_id
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    /// Current step index in `0..6`; `0` while idle or disconnected.
    pub fn step(&self) -> usize {
        match self.state {
            SessionState::Handshaking(step) => step.index(),
            SessionState::AwaitingHistory => Step::RequestHistory.index(),
            SessionState::Idle | SessionState::Disconnected => 0,
        }
    }

    /// `true` between `Connected` and the end of the session.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            SessionState::Handshaking(_) | SessionState::AwaitingHistory
        )
    }

    /// `true` while parked on an external event.
    pub fn is_stopped(&self) -> bool {
        self.is_active()
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::Connected => self.on_connected(),
            Event::WriteAcknowledged(target) => {
                if self.is_active() {
                    debug!("write to {target:?} acknowledged at step {}", self.step());
                }
                Vec::new()
            }
            Event::WriteFailed { target, reason } => {
                self.on_failure(format!("Write to {target:?} failed: {reason}"))
            }
            Event::NotificationEnabled(target) => self.on_notification_enabled(target),
            Event::NotificationFailed { target, reason } => self.on_failure(format!(
                "Enabling notifications on {target:?} failed: {reason}"
            )),
            Event::ServicesDiscovered => self.on_services_discovered(),
            Event::DataReceived(data) => self.on_data(&data),
            Event::Timeout => self.on_timeout(),
            Event::Disconnected => self.on_link_lost(),
        }
    }

    fn on_connected(&mut self) -> Vec<Effect> {
        info!("Connected, starting handshake (user id {})", self.user_id);
        let mut effects = vec![
            Effect::ArmTimer(self.config.inactivity_timeout),
            Effect::Status("Connected, starting handshake".into()),
        ];
        if self.config.sync_clock {
            effects.push(Effect::Write(encode_set_time(Local::now().naive_local())));
        }
        self.run_from(Step::SetUnits, &mut effects);
        effects
    }

    fn on_notification_enabled(&mut self, target: Target) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.state {
            SessionState::Handshaking(step) if step.awaited_notification() == Some(target) => {
                debug!("notifications on {target:?} enabled, leaving step {}", step.index());
                if let Some(next) = step.next() {
                    self.run_from(next, &mut effects);
                }
            }
            _ if self.is_active() => {
                debug!(
                    "ignoring notification ack for {target:?} at step {}",
                    self.step()
                );
            }
            _ => {}
        }
        effects
    }

    fn on_services_discovered(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.is_stopped() {
            return effects;
        }
        let step = match self.state {
            SessionState::Handshaking(step) => step,
            _ => Step::RequestHistory,
        };
        debug!("services rediscovered, resuming step {}", step.index());
        self.run_from(step, &mut effects);
        effects
    }

    fn on_data(&mut self, data: &[u8]) -> Vec<Effect> {
        if !self.is_active() {
            return Vec::new();
        }
        let mut effects = vec![Effect::ArmTimer(self.config.inactivity_timeout)];

        if data.first() == Some(&STOP_MARKER) {
            info!("Scale finished sending history, acknowledging");
            effects.push(Effect::Write(encode_stop_acknowledgment()));
            effects.push(Effect::Write(encode_user_identifier(
                UserIdTag::FinalAck,
                self.user_id,
            )));
            effects.push(Effect::Status("History transfer complete".into()));
            return effects;
        }

        match decode_measurement(data, &self.profile) {
            Ok(Decoded::Measurement(m)) => {
                info!("Measurement: {:.2} kg at {}", m.weight_kg, m.timestamp);
                effects.push(Effect::Measurement(m));
            }
            Ok(Decoded::Skip(reason)) => {
                debug!("skipping packet: {reason:?}");
            }
            Err(e) => {
                debug!("discarding packet {data:02x?}: {e}");
                effects.push(Effect::Status(format!("Discarded packet: {e}")));
            }
        }
        effects
    }

    fn on_timeout(&mut self) -> Vec<Effect> {
        if !self.is_active() {
            return Vec::new();
        }
        warn!("No data from scale, disconnecting");
        self.state = SessionState::Disconnected;
        vec![
            Effect::CancelTimer,
            Effect::Status("Inactivity timeout, disconnecting".into()),
            Effect::Disconnect,
        ]
    }

    fn on_link_lost(&mut self) -> Vec<Effect> {
        if !self.is_active() {
            return Vec::new();
        }
        info!("Scale disconnected");
        self.state = SessionState::Disconnected;
        vec![
            Effect::CancelTimer,
            Effect::Status("Scale disconnected".into()),
        ]
    }

    fn on_failure(&mut self, message: String) -> Vec<Effect> {
        if !self.is_active() {
            return Vec::new();
        }
        warn!("{message}");
        vec![Effect::Status(message)]
    }

    /// Execute steps starting at `step` until one of them parks the session.
    fn run_from(&mut self, mut step: Step, effects: &mut Vec<Effect>) {
        loop {
            self.state = SessionState::Handshaking(step);
            match step {
                Step::SetUnits => {
                    effects.push(Effect::Write(encode_set_units(self.profile.unit)));
                }
                Step::HistoryMagic => {
                    effects.push(Effect::Write(encode_history_mode_magic()));
                }
                Step::EnableHistory | Step::EnableWeight => {
                    if let Some(target) = step.awaited_notification() {
                        effects.push(Effect::EnableNotifications(target));
                    }
                    return;
                }
                Step::ConfigureUser => {
                    effects.push(Effect::Write(encode_user_identifier(
                        UserIdTag::Configure,
                        self.user_id,
                    )));
                }
                Step::RequestHistory => {
                    effects.push(Effect::Write(encode_history_request()));
                    effects.push(Effect::ArmTimer(self.config.inactivity_timeout));
                    effects.push(Effect::Status("Waiting for measurements".into()));
                    self.state = SessionState::AwaitingHistory;
                    return;
                }
            }
            match step.next() {
                Some(next) => step = next,
                None => return,
            }
        }
    }
}
