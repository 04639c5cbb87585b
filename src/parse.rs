//! Decoder for Mi Body Composition Scale 2 measurement notifications.
//!
//! Both the history characteristic and the standard measurement
//! characteristic deliver the same fixed 13-byte layout:
//!
//! | Bytes | Field | Notes |
//! |---|---|---|
//! | 0 | control A | bit 0 = lbs |
//! | 1 | control B | bit 1 = impedance present, bit 5 = stabilized, bit 6 = catty, bit 7 = weight removed |
//! | 2–3 | year | u16, low byte first |
//! | 4–8 | month, day, hour, minute, second | one byte each |
//! | 9–10 | impedance (Ω) | u16, low byte first; valid only with bit 1 |
//! | 11–12 | weight raw | u16, low byte first |
//!
//! Decoding is pure apart from [`decode_measurement`], which reads the local
//! clock to bound the packet date; use [`decode_measurement_at`] to supply
//! the reference time explicitly.

use chrono::{Datelike, Local, Months, NaiveDate, NaiveDateTime, Timelike};

use crate::body_composition::BodyComposition;
use crate::error::DecodeError;
use crate::protocol::MEASUREMENT_PACKET_LEN;
use crate::types::{ScaleMeasurement, UserProfile};

// ── Control bits ──────────────────────────────────────────────────────────────

mod flag {
    /// Control byte A.
    pub const LBS: u8 = 1 << 0;
    /// Control byte B.
    pub const IMPEDANCE: u8 = 1 << 1;
    pub const STABILIZED: u8 = 1 << 5;
    pub const CATTY: u8 = 1 << 6;
    pub const WEIGHT_REMOVED: u8 = 1 << 7;
}

/// Packet dates further than this from "now" are rejected.
const PLAUSIBLE_YEARS: u32 = 20;

// ── Raw packet ────────────────────────────────────────────────────────────────

/// A 13-byte measurement packet split into its fields, before any unit or
/// plausibility handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawPacket {
    pub control: [u8; 2],
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub impedance: u16,
    pub weight_raw: u16,
}

impl RawPacket {
    /// A stabilized kg-unit packet stamped with `timestamp`, no impedance.
    pub fn stabilized(timestamp: NaiveDateTime, weight_raw: u16) -> Self {
        Self {
            control: [0, flag::STABILIZED],
            year: timestamp.year() as u16,
            month: timestamp.month() as u8,
            day: timestamp.day() as u8,
            hour: timestamp.hour() as u8,
            minute: timestamp.minute() as u8,
            second: timestamp.second() as u8,
            impedance: 0,
            weight_raw,
        }
    }

    pub fn with_impedance(mut self, impedance: u16) -> Self {
        self.control[1] |= flag::IMPEDANCE;
        self.impedance = impedance;
        self
    }

    pub fn with_lbs(mut self) -> Self {
        self.control[0] |= flag::LBS;
        self
    }

    pub fn with_catty(mut self) -> Self {
        self.control[1] |= flag::CATTY;
        self
    }

    pub fn with_weight_removed(mut self) -> Self {
        self.control[1] |= flag::WEIGHT_REMOVED;
        self
    }

    pub fn unstabilized(mut self) -> Self {
        self.control[1] &= !flag::STABILIZED;
        self
    }

    /// Split a notification payload.  Fails unless it is exactly 13 bytes.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let data: &[u8; MEASUREMENT_PACKET_LEN] =
            data.try_into().map_err(|_| DecodeError::InvalidLength {
                expected: MEASUREMENT_PACKET_LEN,
                actual: data.len(),
            })?;

        Ok(Self {
            control: [data[0], data[1]],
            year: u16::from_le_bytes([data[2], data[3]]),
            month: data[4],
            day: data[5],
            hour: data[6],
            minute: data[7],
            second: data[8],
            impedance: u16::from_le_bytes([data[9], data[10]]),
            weight_raw: u16::from_le_bytes([data[11], data[12]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; MEASUREMENT_PACKET_LEN] {
        let [year_lo, year_hi] = self.year.to_le_bytes();
        let [imp_lo, imp_hi] = self.impedance.to_le_bytes();
        let [w_lo, w_hi] = self.weight_raw.to_le_bytes();
        [
            self.control[0],
            self.control[1],
            year_lo,
            year_hi,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            imp_lo,
            imp_hi,
            w_lo,
            w_hi,
        ]
    }

    pub fn is_lbs(&self) -> bool {
        self.control[0] & flag::LBS != 0
    }

    pub fn has_impedance(&self) -> bool {
        self.control[1] & flag::IMPEDANCE != 0
    }

    pub fn is_stabilized(&self) -> bool {
        self.control[1] & flag::STABILIZED != 0
    }

    pub fn is_catty(&self) -> bool {
        self.control[1] & flag::CATTY != 0
    }

    pub fn is_weight_removed(&self) -> bool {
        self.control[1] & flag::WEIGHT_REMOVED != 0
    }

    /// The calendar timestamp carried in bytes 2–8.
    pub fn timestamp(&self) -> Result<NaiveDateTime, DecodeError> {
        calendar(
            self.year,
            [self.month, self.day, self.hour, self.minute, self.second],
        )
    }

    /// Weight in the unit the packet flags announce.
    ///
    /// lbs and catty readings carry 1/100 resolution, kg readings 1/200.
    pub fn scaled_weight(&self) -> f64 {
        if self.is_lbs() || self.is_catty() {
            self.weight_raw as f64 / 100.0
        } else {
            self.weight_raw as f64 / 200.0
        }
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Why a well-formed packet produced no measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The reading is still settling.
    NotStabilized,
    /// The user stepped off before the reading finished.
    WeightRemoved,
}

/// Result of decoding a well-formed packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Measurement(ScaleMeasurement),
    Skip(SkipReason),
}

/// Decode a notification payload against the local wall clock.
pub fn decode_measurement(data: &[u8], profile: &UserProfile) -> Result<Decoded, DecodeError> {
    decode_measurement_at(data, profile, Local::now().naive_local())
}

/// Decode a notification payload, bounding the packet date to
/// `now ± 20 years`.
///
/// The divisor comes from the packet's own unit flags while the conversion
/// to kilograms uses `profile.unit`, as the vendor app does.  The two
/// disagree when the scale display is set to a different unit than the
/// profile declares.
pub fn decode_measurement_at(
    data: &[u8],
    profile: &UserProfile,
    now: NaiveDateTime,
) -> Result<Decoded, DecodeError> {
    let packet = RawPacket::parse(data)?;

    if !packet.is_stabilized() {
        return Ok(Decoded::Skip(SkipReason::NotStabilized));
    }
    if packet.is_weight_removed() {
        return Ok(Decoded::Skip(SkipReason::WeightRemoved));
    }

    let timestamp = packet.timestamp()?;
    let window = Months::new(12 * PLAUSIBLE_YEARS);
    let earliest = now.checked_sub_months(window).unwrap_or(NaiveDateTime::MIN);
    let latest = now.checked_add_months(window).unwrap_or(NaiveDateTime::MAX);
    if timestamp < earliest || timestamp > latest {
        return Err(DecodeError::DateOutOfRange(timestamp));
    }

    let weight_kg = profile.unit.to_kg(packet.scaled_weight());
    let impedance = packet.has_impedance().then_some(packet.impedance);

    let mut measurement = ScaleMeasurement {
        weight_kg,
        timestamp,
        impedance,
        body_fat_percent: None,
        water_percent: None,
        muscle_percent: None,
        bone_mass_kg: None,
        visceral_fat: None,
        lean_body_mass_kg: None,
    };

    // A zero reading carries no weight to divide by.
    if let Some(ohms) = impedance.filter(|&i| i > 0 && weight_kg > 0.0) {
        let summary = BodyComposition::for_profile(profile).summarize(weight_kg, ohms as f64);
        measurement.body_fat_percent = Some(summary.body_fat_percent);
        measurement.water_percent = Some(summary.water_percent);
        measurement.muscle_percent = Some(summary.muscle_mass_kg / weight_kg * 100.0);
        measurement.bone_mass_kg = Some(summary.bone_mass_kg);
        measurement.visceral_fat = Some(summary.visceral_fat);
        measurement.lean_body_mass_kg = Some(summary.lean_body_mass_kg);
    }

    Ok(Decoded::Measurement(measurement))
}

/// Decode a Current Time characteristic value (`year` little-endian, then
/// month, day, hour, minute, second; trailing fields are ignored).
pub fn decode_current_time(data: &[u8]) -> Result<NaiveDateTime, DecodeError> {
    if data.len() < 7 {
        return Err(DecodeError::InvalidLength {
            expected: 10,
            actual: data.len(),
        });
    }
    calendar(
        u16::from_le_bytes([data[0], data[1]]),
        [data[2], data[3], data[4], data[5], data[6]],
    )
}

/// `fields` is month, day, hour, minute, second.
fn calendar(year: u16, fields: [u8; 5]) -> Result<NaiveDateTime, DecodeError> {
    let [month, day, hour, minute, second] = fields;
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or(DecodeError::InvalidDate {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
}
