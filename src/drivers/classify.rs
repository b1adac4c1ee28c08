//! Impedance → health status bands.
//!
//! Bands are evaluated low to high. Every band except the lowest includes
//! its upper edge, so a reading exactly on a threshold lands in the
//! lower-impedance band. The lowest band (below the short-circuit floor)
//! is half-open: the floor value itself is already GOOD.

use serde::Deserialize;

use crate::config::ConfigError;
use crate::types::{ChannelStatus, Rgb, OPEN_CIRCUIT_OHMS};

/// Band edges in ohms, as they appear in configuration.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Thresholds {
    /// Below this the electrode is suspiciously low (possible short).
    pub short_floor_ohms: f64,
    pub good_max_ohms: f64,
    pub acceptable_max_ohms: f64,
    pub bad_max_ohms: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Band {
    pub lower_ohms: f64,
    /// `f64::INFINITY` for the terminal band.
    pub upper_ohms: f64,
    pub upper_inclusive: bool,
    pub status: ChannelStatus,
    pub color: Rgb,
}

impl Band {
    fn contains_upper(&self, ohms: f64) -> bool {
        if self.upper_inclusive {
            ohms <= self.upper_ohms
        } else {
            ohms < self.upper_ohms
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationBands {
    bands: Vec<Band>,
}

impl ClassificationBands {
    pub fn new(t: &Thresholds) -> Result<Self, ConfigError> {
        let edges = [
            ("short_floor_ohms", t.short_floor_ohms),
            ("good_max_ohms", t.good_max_ohms),
            ("acceptable_max_ohms", t.acceptable_max_ohms),
            ("bad_max_ohms", t.bad_max_ohms),
        ];
        if let Some((name, value)) = edges.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
            return Err(ConfigError::Invalid(format!(
                "bands.{name} must be a finite, non-negative number (got {value})"
            )));
        }
        if t.short_floor_ohms > t.good_max_ohms
            || t.good_max_ohms >= t.acceptable_max_ohms
            || t.acceptable_max_ohms >= t.bad_max_ohms
        {
            return Err(ConfigError::Invalid(
                "bands must satisfy short_floor <= good_max < acceptable_max < bad_max".into(),
            ));
        }
        if t.bad_max_ohms >= OPEN_CIRCUIT_OHMS {
            return Err(ConfigError::Invalid(format!(
                "bands.bad_max_ohms must stay below the open-circuit value {OPEN_CIRCUIT_OHMS}"
            )));
        }

        let mut bands = Vec::with_capacity(5);
        if t.short_floor_ohms > 0.0 {
            bands.push(Band {
                lower_ohms: 0.0,
                upper_ohms: t.short_floor_ohms,
                upper_inclusive: false,
                status: ChannelStatus::Acceptable,
                color: Rgb::AMBER,
            });
        }
        bands.extend([
            Band {
                lower_ohms: t.short_floor_ohms,
                upper_ohms: t.good_max_ohms,
                upper_inclusive: true,
                status: ChannelStatus::Good,
                color: Rgb::GREEN,
            },
            Band {
                lower_ohms: t.good_max_ohms,
                upper_ohms: t.acceptable_max_ohms,
                upper_inclusive: true,
                status: ChannelStatus::Acceptable,
                color: Rgb::AMBER,
            },
            Band {
                lower_ohms: t.acceptable_max_ohms,
                upper_ohms: t.bad_max_ohms,
                upper_inclusive: true,
                status: ChannelStatus::Bad,
                color: Rgb::RED,
            },
            Band {
                lower_ohms: t.bad_max_ohms,
                upper_ohms: f64::INFINITY,
                upper_inclusive: true,
                status: ChannelStatus::Fail,
                color: Rgb::BLUE,
            },
        ]);
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    /// Total over every input; NaN classifies as FAIL.
    pub fn classify(&self, ohms: f64) -> (ChannelStatus, Rgb) {
        if ohms.is_nan() {
            return (ChannelStatus::Fail, Rgb::BLUE);
        }
        self.bands
            .iter()
            .find(|band| band.contains_upper(ohms))
            .map(|band| (band.status, band.color))
            .unwrap_or((ChannelStatus::Fail, Rgb::BLUE))
    }
}
