//! Empirical body-composition estimates for the Mi Body Composition Scale 2.
//!
//! The constants and branch thresholds below were reverse-engineered from the
//! vendor app and must be kept bit-for-bit; several results are forced to
//! sentinel values (75 % body fat, 8 kg bone mass, 120 kg lean mass) when
//! they leave the range the vendor considers plausible.
//!
//! All functions are pure.  Callers must only pass impedance > 0; the
//! decoder in [`crate::parse`] guards this before calling in.

use serde::Serialize;

use crate::types::{Gender, UserProfile};

/// The attributes the formulas depend on besides weight and impedance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyComposition {
    gender: Gender,
    age: f64,
    height_cm: f64,
}

/// Every estimate for one (weight, impedance) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompositionSummary {
    pub body_fat_percent: f64,
    pub water_percent: f64,
    pub muscle_mass_kg: f64,
    pub bone_mass_kg: f64,
    pub visceral_fat: f64,
    pub lean_body_mass_kg: f64,
}

impl BodyComposition {
    pub fn new(gender: Gender, age: u16, height_cm: f64) -> Self {
        Self {
            gender,
            age: age as f64,
            height_cm,
        }
    }

    pub fn for_profile(profile: &UserProfile) -> Self {
        Self::new(profile.gender, profile.age, profile.height_cm)
    }

    fn is_female(&self) -> bool {
        !self.gender.is_male()
    }

    pub fn bmi(&self, weight: f64) -> f64 {
        let h = self.height_cm / 100.0;
        weight / (h * h)
    }

    fn lbm_coefficient(&self, weight: f64, impedance: f64) -> f64 {
        let mut lbm = (self.height_cm * 9.058 / 100.0) * (self.height_cm / 100.0);
        lbm += weight * 0.32 + 12.226;
        lbm -= impedance * 0.0068;
        lbm -= self.age * 0.0542;
        lbm
    }

    pub fn body_fat(&self, weight: f64, impedance: f64) -> f64 {
        let lbm_sub = match (self.gender, self.age <= 49.0) {
            (Gender::Female, true) => 9.25,
            (Gender::Female, false) => 7.25,
            (Gender::Male, _) => 0.8,
        };

        let mut coeff = 1.0;
        if self.gender.is_male() && weight < 61.0 {
            coeff = 0.98;
        } else if self.is_female() && weight > 60.0 {
            coeff = 0.96;
            if self.height_cm > 160.0 {
                coeff *= 1.03;
            }
        } else if self.is_female() && weight < 50.0 {
            coeff = 1.02;
            if self.height_cm > 160.0 {
                coeff *= 1.03;
            }
        }

        let lbm = self.lbm_coefficient(weight, impedance);
        let body_fat = (1.0 - ((lbm - lbm_sub) * coeff) / weight) * 100.0;
        if body_fat > 63.0 {
            75.0
        } else {
            body_fat
        }
    }

    pub fn water(&self, weight: f64, impedance: f64) -> f64 {
        let water = (100.0 - self.body_fat(weight, impedance)) * 0.7;
        let coeff = if water < 50.0 { 1.02 } else { 0.98 };
        water * coeff
    }

    pub fn bone_mass(&self, weight: f64, impedance: f64) -> f64 {
        let base = match self.gender {
            Gender::Female => 0.245691014,
            Gender::Male => 0.18016894,
        };
        let mut bone = -(base - self.lbm_coefficient(weight, impedance) * 0.05158);
        if bone > 2.2 {
            bone += 0.1;
        } else {
            bone -= 0.1;
        }

        match self.gender {
            Gender::Female if bone > 5.1 => 8.0,
            Gender::Male if bone > 5.2 => 8.0,
            _ => bone,
        }
    }

    pub fn lean_body_mass(&self, weight: f64, impedance: f64) -> f64 {
        let lbm = weight
            - (self.body_fat(weight, impedance) / 100.0 * weight)
            - self.bone_mass(weight, impedance);

        match self.gender {
            Gender::Female if lbm >= 84.0 => 120.0,
            Gender::Male if lbm >= 93.5 => 120.0,
            _ => lbm,
        }
    }

    /// Reported identically to lean body mass.
    pub fn muscle_mass(&self, weight: f64, impedance: f64) -> f64 {
        self.lean_body_mass(weight, impedance)
    }

    pub fn visceral_fat(&self, weight: f64) -> f64 {
        let h = self.height_cm;
        let age = self.age;
        match self.gender {
            Gender::Female => {
                if weight > -(13.0 - h * 0.5) {
                    let denom = h * 1.45 + h * 0.1158 * h - 120.0;
                    (weight * 500.0 / denom - 6.0) + age * 0.07
                } else {
                    let k = 0.691 - 0.0024 * h - 0.0024 * h;
                    -(h * 0.027 - k * weight) + age * 0.07 - age
                }
            }
            Gender::Male => {
                if h < weight * 1.6 {
                    let denom = -(h * 0.4 - h * h * 0.0826) + 48.0;
                    weight * 305.0 / denom - 2.9 + age * 0.15
                } else {
                    let k = 0.765 - h * 0.0015;
                    -(h * 0.143 - weight * k) + age * 0.15 - 5.0
                }
            }
        }
    }

    pub fn summarize(&self, weight: f64, impedance: f64) -> CompositionSummary {
        CompositionSummary {
            body_fat_percent: self.body_fat(weight, impedance),
            water_percent: self.water(weight, impedance),
            muscle_mass_kg: self.muscle_mass(weight, impedance),
            bone_mass_kg: self.bone_mass(weight, impedance),
            visceral_fat: self.visceral_fat(weight),
            lean_body_mass_kg: self.lean_body_mass(weight, impedance),
        }
    }
}
