//! GATT UUIDs, wire constants, and command builders for the Mi Body
//! Composition Scale 2.
//!
//! The scale exposes the standard Body Composition service (`0x181B`) plus
//! two Huami vendor characteristics in the
//! `0000XXXX-0000-3512-2118-0009af100700` namespace.

use chrono::{Datelike, NaiveDateTime, Timelike};
use uuid::Uuid;

use crate::types::WeightUnit;

// ── Services ─────────────────────────────────────────────────────────────────

/// Standard Body Composition service.  Carries the history characteristic,
/// the standard measurement characteristic and the current-time
/// characteristic.
pub const BODY_COMPOSITION_SERVICE: Uuid =
    Uuid::from_u128(0x0000181b_0000_1000_8000_00805f9b34fb);

/// Huami configuration service that owns [`CONFIG_CHARACTERISTIC`].
pub const CUSTOM_CONFIG_SERVICE: Uuid = Uuid::from_u128(0x00001530_0000_3512_2118_0009af100700);

// ── Characteristics ───────────────────────────────────────────────────────────

/// Vendor history characteristic.
///
/// Receives the history-mode magic, the user identifier and the history
/// request, and notifies replayed (previously unsent) measurements.
pub const HISTORY_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00002a2f_0000_3512_2118_0009af100700);

/// Standard Body Composition Measurement characteristic (`0x2A9C`).
///
/// Notifies live 13-byte measurement packets.
pub const WEIGHT_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00002a9c_0000_1000_8000_00805f9b34fb);

/// Standard Current Time characteristic (`0x2A2B`), used for optional clock
/// sync.
pub const CURRENT_TIME_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x00002a2b_0000_1000_8000_00805f9b34fb);

/// Vendor configuration characteristic that accepts the set-units command.
pub const CONFIG_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00001542_0000_3512_2118_0009af100700);

// ── Wire constants ────────────────────────────────────────────────────────────

/// Every measurement notification is exactly this long.
pub const MEASUREMENT_PACKET_LEN: usize = 13;

/// First byte of a scale-originated "history replay finished" notification.
pub const STOP_MARKER: u8 = 0x03;

/// Unlocks history replay on the history characteristic.
pub const HISTORY_MODE_MAGIC: [u8; 5] = [0x01, 0x96, 0x8a, 0xbd, 0x62];

/// Advertised-name prefixes of the scales this crate talks to.
pub const SCALE_NAME_PREFIXES: [&str; 2] = ["MIBFS", "MIBCS"];

// ── Targets ───────────────────────────────────────────────────────────────────

/// A service + characteristic pair a command is written to or a
/// subscription is made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Config,
    History,
    Weight,
    CurrentTime,
}

impl Target {
    pub fn service(self) -> Uuid {
        match self {
            Target::Config => CUSTOM_CONFIG_SERVICE,
            Target::History | Target::Weight | Target::CurrentTime => BODY_COMPOSITION_SERVICE,
        }
    }

    pub fn characteristic(self) -> Uuid {
        match self {
            Target::Config => CONFIG_CHARACTERISTIC,
            Target::History => HISTORY_CHARACTERISTIC,
            Target::Weight => WEIGHT_CHARACTERISTIC,
            Target::CurrentTime => CURRENT_TIME_CHARACTERISTIC,
        }
    }

    /// Reverse lookup used to route inbound notifications.
    pub fn from_characteristic(uuid: Uuid) -> Option<Target> {
        [
            Target::Config,
            Target::History,
            Target::Weight,
            Target::CurrentTime,
        ]
        .into_iter()
        .find(|t| t.characteristic() == uuid)
    }
}

/// An encoded command and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub target: Target,
    pub bytes: Vec<u8>,
}

impl Command {
    fn new(target: Target, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            target,
            bytes: bytes.into(),
        }
    }
}

/// Which variant of the user-identifier command to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserIdTag {
    /// Sent during the handshake (step 4).
    Configure,
    /// Sent after the scale signals the end of a history replay.
    FinalAck,
}

impl UserIdTag {
    pub fn byte(self) -> u8 {
        match self {
            UserIdTag::Configure => 0x01,
            UserIdTag::FinalAck => 0x04,
        }
    }
}

// ── Command builders ──────────────────────────────────────────────────────────

/// Set the display unit: `[0x06, 0x04, 0x00, unit]`.
///
/// ```
/// # use miscale_rs::protocol::encode_set_units;
/// # use miscale_rs::types::WeightUnit;
/// assert_eq!(encode_set_units(WeightUnit::Lbs).bytes, [0x06, 0x04, 0x00, 0x01]);
/// ```
pub fn encode_set_units(unit: WeightUnit) -> Command {
    Command::new(Target::Config, [0x06, 0x04, 0x00, unit.code()])
}

/// Set the scale clock.
///
/// ```text
/// byte 0–1 : year (little-endian)
/// byte 2–6 : month, day, hour, minute, second
/// byte 7–9 : 0x03 0x00 0x00
/// ```
pub fn encode_set_time(timestamp: NaiveDateTime) -> Command {
    let [year_lo, year_hi] = (timestamp.year() as u16).to_le_bytes();
    Command::new(
        Target::CurrentTime,
        [
            year_lo,
            year_hi,
            timestamp.month() as u8,
            timestamp.day() as u8,
            timestamp.hour() as u8,
            timestamp.minute() as u8,
            timestamp.second() as u8,
            0x03,
            0x00,
            0x00,
        ],
    )
}

/// `[tag, 0xFF, 0xFF, id_hi, id_lo]` on the history characteristic.
pub fn encode_user_identifier(tag: UserIdTag, unique_id: u16) -> Command {
    let [hi, lo] = unique_id.to_be_bytes();
    Command::new(Target::History, [tag.byte(), 0xFF, 0xFF, hi, lo])
}

/// Ask the scale to replay stored measurements.
pub fn encode_history_request() -> Command {
    Command::new(Target::History, [0x02])
}

/// Acknowledge the scale's stop marker.
pub fn encode_stop_acknowledgment() -> Command {
    Command::new(Target::History, [STOP_MARKER])
}

/// Put the history characteristic into history mode.
pub fn encode_history_mode_magic() -> Command {
    Command::new(Target::History, HISTORY_MODE_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_set_units_bytes() {
        assert_eq!(
            encode_set_units(WeightUnit::Kg).bytes,
            vec![0x06, 0x04, 0x00, 0x00]
        );
        assert_eq!(
            encode_set_units(WeightUnit::Catty).bytes,
            vec![0x06, 0x04, 0x00, 0x02]
        );
        assert_eq!(encode_set_units(WeightUnit::Kg).target, Target::Config);
    }

    #[test]
    fn test_set_time_layout() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 59)
            .unwrap();
        let cmd = encode_set_time(ts);
        assert_eq!(cmd.target, Target::CurrentTime);
        // 2024 = 0x07E8
        assert_eq!(
            cmd.bytes,
            vec![0xE8, 0x07, 3, 9, 14, 5, 59, 0x03, 0x00, 0x00]
        );
    }

    #[test]
    fn test_user_identifier_variants() {
        let cmd = encode_user_identifier(UserIdTag::Configure, 0x1234);
        assert_eq!(cmd.bytes, vec![0x01, 0xFF, 0xFF, 0x12, 0x34]);
        assert_eq!(cmd.target, Target::History);

        let cmd = encode_user_identifier(UserIdTag::FinalAck, 0x00AB);
        assert_eq!(cmd.bytes, vec![0x04, 0xFF, 0xFF, 0x00, 0xAB]);
    }

    #[test]
    fn test_single_byte_commands() {
        assert_eq!(encode_history_request().bytes, vec![0x02]);
        assert_eq!(encode_stop_acknowledgment().bytes, vec![0x03]);
        assert_eq!(
            encode_history_mode_magic().bytes,
            vec![0x01, 0x96, 0x8a, 0xbd, 0x62]
        );
    }

    #[test]
    fn test_target_lookup() {
        assert_eq!(
            Target::from_characteristic(HISTORY_CHARACTERISTIC),
            Some(Target::History)
        );
        assert_eq!(
            Target::from_characteristic(WEIGHT_CHARACTERISTIC),
            Some(Target::Weight)
        );
        assert_eq!(Target::from_characteristic(Uuid::nil()), None);
        assert_eq!(Target::Config.service(), CUSTOM_CONFIG_SERVICE);
        assert_eq!(Target::Weight.service(), BODY_COMPOSITION_SERVICE);
    }
}
