//! Composite vital-sign scores. Pure functions over pre-validated inputs.
//!
//! MEWS bands (Subbe et al., 2001), points per parameter:
//!
//! | parameter        | 3     | 2       | 1       | 0        | 1        | 2        | 3    |
//! |------------------|-------|---------|---------|----------|----------|----------|------|
//! | systolic BP      | ≤70   | 71–80   | 81–100  | 101–199  |          | ≥200     |      |
//! | heart rate       |       | <40     | 40–50   | 51–100   | 101–110  | 111–129  | ≥130 |
//! | respiratory rate |       | <9      |         | 9–14     | 15–20    | 21–29    | ≥30  |
//! | temperature °C   |       | <35.0   |         | 35.0–38.4|          | ≥38.5    |      |
//! | AVPU             |       |         |         | Alert    | Voice    | Pain     | Unresponsive |
//!
//! A missing vital contributes zero.

use serde::{Deserialize, Serialize};

use super::assessment::{Avpu, Vitals};

/// Mean arterial pressure, `(SBP + 2·DBP) / 3` rounded to the nearest mmHg.
pub fn calc_map(sbp: u16, dbp: u16) -> u16 {
    let total = u32::from(sbp) + 2 * u32::from(dbp);
    ((total as f64) / 3.0).round() as u16
}

/// MAP when both pressures were recorded.
pub fn map_from_vitals(vitals: &Vitals) -> Option<u16> {
    Some(calc_map(vitals.sbp?, vitals.dbp?))
}

/// Per-parameter MEWS points, kept for audit trails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MewsBreakdown {
    pub systolic: u8,
    pub heart_rate: u8,
    pub respiratory_rate: u8,
    pub temperature: u8,
    pub consciousness: u8,
}

impl MewsBreakdown {
    pub fn total(&self) -> u8 {
        self.systolic + self.heart_rate + self.respiratory_rate + self.temperature + self.consciousness
    }
}

/// MEWS total. Consciousness comes from `avpu`, else is approximated from GCS.
pub fn calc_mews(vitals: &Vitals, avpu: Option<Avpu>) -> u8 {
    mews_breakdown(vitals, avpu).total()
}

pub fn mews_breakdown(vitals: &Vitals, avpu: Option<Avpu>) -> MewsBreakdown {
    let consciousness = avpu.or_else(|| vitals.gcs.map(Avpu::from_gcs));
    MewsBreakdown {
        systolic: vitals.sbp.map(systolic_points).unwrap_or(0),
        heart_rate: vitals.hr.map(heart_rate_points).unwrap_or(0),
        respiratory_rate: vitals.rr.map(respiratory_rate_points).unwrap_or(0),
        temperature: vitals.temp.map(temperature_points).unwrap_or(0),
        consciousness: consciousness.map(consciousness_points).unwrap_or(0),
    }
}

fn systolic_points(sbp: u16) -> u8 {
    match sbp {
        0..=70 => 3,
        71..=80 => 2,
        81..=100 => 1,
        101..=199 => 0,
        _ => 2,
    }
}

fn heart_rate_points(hr: u16) -> u8 {
    match hr {
        0..=39 => 2,
        40..=50 => 1,
        51..=100 => 0,
        101..=110 => 1,
        111..=129 => 2,
        _ => 3,
    }
}

fn respiratory_rate_points(rr: u16) -> u8 {
    match rr {
        0..=8 => 2,
        9..=14 => 0,
        15..=20 => 1,
        21..=29 => 2,
        _ => 3,
    }
}

fn temperature_points(temp: f32) -> u8 {
    if temp < 35.0 || temp >= 38.5 {
        2
    } else {
        0
    }
}

fn consciousness_points(avpu: Avpu) -> u8 {
    match avpu {
        Avpu::Alert => 0,
        Avpu::Voice => 1,
        Avpu::Pain => 2,
        Avpu::Unresponsive => 3,
    }
}
