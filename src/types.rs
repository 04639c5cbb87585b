use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::Serialize;

/// Biological sex used by the body-composition formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    pub fn is_male(self) -> bool {
        self == Gender::Male
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            other => Err(format!("unknown gender '{other}' (expected male or female)")),
        }
    }
}

/// Display unit the scale is configured to show.
///
/// | Unit | Wire code | kg per unit |
/// |---|---|---|
/// | `Kg` | 0 | 1.0 |
/// | `Lbs` | 1 | 0.453592 |
/// | `Catty` | 2 | 0.5 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    #[default]
    Kg,
    Lbs,
    Catty,
}

impl WeightUnit {
    /// Code written in the set-units command.
    pub fn code(self) -> u8 {
        match self {
            WeightUnit::Kg => 0,
            WeightUnit::Lbs => 1,
            WeightUnit::Catty => 2,
        }
    }

    /// Kilograms per one of this unit.
    pub fn kg_factor(self) -> f64 {
        match self {
            WeightUnit::Kg => 1.0,
            WeightUnit::Lbs => 0.453592,
            WeightUnit::Catty => 0.5,
        }
    }

    pub fn to_kg(self, value: f64) -> f64 {
        value * self.kg_factor()
    }

    pub fn from_kg(self, kg: f64) -> f64 {
        kg / self.kg_factor()
    }

    pub fn label(self) -> &'static str {
        match self {
            WeightUnit::Kg => "kg",
            WeightUnit::Lbs => "lbs",
            WeightUnit::Catty => "catty",
        }
    }
}

impl fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for WeightUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kg" => Ok(WeightUnit::Kg),
            "lb" | "lbs" => Ok(WeightUnit::Lbs),
            "catty" | "jin" => Ok(WeightUnit::Catty),
            other => Err(format!("unknown unit '{other}' (expected kg, lbs or catty)")),
        }
    }
}

/// The person stepping on the scale.
///
/// Supplied by the caller once per session and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProfile {
    pub gender: Gender,
    /// Age in whole years (> 0).
    pub age: u16,
    /// Height in centimetres (> 0).
    pub height_cm: f64,
    /// Unit the scale display is set to at step 0 and the unit used to
    /// convert decoded weights into kilograms.
    pub unit: WeightUnit,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            gender: Gender::Male,
            age: 30,
            height_cm: 175.0,
            unit: WeightUnit::Kg,
        }
    }
}

/// One finished weighing decoded from a 13-byte packet.
///
/// Only [`crate::parse::decode_measurement`] builds these.  The
/// body-composition fields are either all `Some` (impedance was present and
/// non-zero) or all `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleMeasurement {
    /// Weight in kilograms.
    pub weight_kg: f64,
    /// Device-local time stamped into the packet by the scale.
    pub timestamp: NaiveDateTime,
    /// Bioelectrical impedance in ohms, when the scale measured it.
    pub impedance: Option<u16>,
    pub body_fat_percent: Option<f64>,
    pub water_percent: Option<f64>,
    pub muscle_percent: Option<f64>,
    pub bone_mass_kg: Option<f64>,
    pub visceral_fat: Option<f64>,
    pub lean_body_mass_kg: Option<f64>,
}

impl ScaleMeasurement {
    pub fn has_composition(&self) -> bool {
        self.body_fat_percent.is_some()
    }
}

/// Everything [`crate::scale_client::ScaleClient`] publishes to the
/// application.
///
/// Consumers receive these through the `mpsc::Receiver` returned by
/// [`crate::scale_client::ScaleClient::connect`] or
/// [`crate::scale_client::ScaleClient::connect_to`].
#[derive(Debug, Clone)]
pub enum ScaleEvent {
    /// The link is up; the inner `String` is the advertised name.
    Connected(String),
    /// Human-readable progress or error note (handshake steps, write
    /// failures, discarded packets).
    Status(String),
    /// A stabilized weighing, live or replayed from the scale's history.
    Measurement(ScaleMeasurement),
    /// The session ended (inactivity timeout, link loss or explicit
    /// disconnect).  No further events follow on this channel.
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_round_trip() {
        for unit in [WeightUnit::Kg, WeightUnit::Lbs, WeightUnit::Catty] {
            for kg in [0.5, 42.0, 70.0, 151.35] {
                let back = unit.to_kg(unit.from_kg(kg));
                assert!((back - kg).abs() < 1e-9, "{unit}: {kg} -> {back}");
            }
        }
    }

    #[test]
    fn test_unit_codes() {
        assert_eq!(WeightUnit::Kg.code(), 0);
        assert_eq!(WeightUnit::Lbs.code(), 1);
        assert_eq!(WeightUnit::Catty.code(), 2);
    }

    #[test]
    fn test_parse_profile_fields() {
        assert_eq!("LBS".parse::<WeightUnit>().unwrap(), WeightUnit::Lbs);
        assert_eq!("catty".parse::<WeightUnit>().unwrap(), WeightUnit::Catty);
        assert!("stone".parse::<WeightUnit>().is_err());
        assert_eq!("f".parse::<Gender>().unwrap(), Gender::Female);
        assert_eq!(" Male ".parse::<Gender>().unwrap(), Gender::Male);
        assert!("x".parse::<Gender>().is_err());
    }
}
