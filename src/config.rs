//! Fixture configuration.
//!
//! Loaded once at start-up from JSON. Calibration values (the reference
//! table, the band thresholds) and the excitation wiring have no defaults:
//! a fixture measured against guessed values reports meaningless
//! statuses, so a missing or malformed entry is fatal here rather than
//! discovered mid-cycle.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::drivers::ads1115::{self, Gain, SampleTiming, MUX_INPUTS};
use crate::drivers::classify::{ClassificationBands, Thresholds};
use crate::drivers::excitation::{AfterCycle, Polarity};
use crate::drivers::feedback::PixelMap;
use crate::drivers::impedance::ReferenceTable;
use crate::drivers::ina219;
use crate::drivers::orchestrator::Strategy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureConfig {
    pub channels: ChannelsConfig,
    pub bands: Thresholds,
    pub excitation: ExcitationConfig,
    #[serde(default)]
    pub adc: AdcConfig,
    #[serde(default)]
    pub bus_monitor: Option<BusMonitorConfig>,
    #[serde(default)]
    pub indicators: Option<IndicatorConfig>,
    #[serde(default)]
    pub display: Option<DisplayConfig>,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelsConfig {
    /// Calibration resistor per channel, channel 0 first.
    pub reference_resistances_ohms: Vec<f64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExcitationConfig {
    pub polarity: Polarity,
    pub after_cycle: AfterCycle,
    #[serde(default = "ExcitationConfig::default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "ExcitationConfig::default_nominal_voltage")]
    pub nominal_voltage_v: f64,
    #[serde(default = "ExcitationConfig::default_plausibility_floor")]
    pub plausibility_floor_v: f64,
}

impl ExcitationConfig {
    fn default_settle_ms() -> u64 {
        200
    }

    fn default_nominal_voltage() -> f64 {
        3.3
    }

    fn default_plausibility_floor() -> f64 {
        2.5
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdcConfig {
    pub address: u8,
    pub gain: Gain,
    pub samples: usize,
    pub mux_settle_ms: u64,
    pub sample_interval_ms: u64,
    pub conversion_ms: u64,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            address: ads1115::DEFAULT_ADDRESS,
            gain: Gain::default(),
            samples: 3,
            mux_settle_ms: 10,
            sample_interval_ms: 2,
            // one 128 SPS conversion plus margin
            conversion_ms: 9,
        }
    }
}

impl AdcConfig {
    pub fn timing(&self) -> SampleTiming {
        SampleTiming {
            mux_settle: Duration::from_millis(self.mux_settle_ms),
            sample_interval: Duration::from_millis(self.sample_interval_ms),
            samples: self.samples,
        }
    }

    pub fn conversion_delay(&self) -> Duration {
        Duration::from_millis(self.conversion_ms)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusMonitorConfig {
    pub address: u8,
    pub shunt_ohms: f64,
    pub max_expected_amps: f64,
}

impl Default for BusMonitorConfig {
    fn default() -> Self {
        Self {
            address: ina219::DEFAULT_ADDRESS,
            shunt_ohms: 0.1,
            max_expected_amps: 0.4,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorConfig {
    #[serde(default = "IndicatorConfig::default_pixel_count")]
    pub pixel_count: usize,
    /// LED position for each channel, channel 0 first.
    pub channel_pixels: Vec<usize>,
    #[serde(default = "IndicatorConfig::default_clear_first")]
    pub clear_first: bool,
    /// Global ring brightness, 0 (dark) to 255 (full).
    #[serde(default = "IndicatorConfig::default_brightness")]
    pub brightness: u8,
}

impl IndicatorConfig {
    fn default_pixel_count() -> usize {
        12
    }

    fn default_clear_first() -> bool {
        true
    }

    fn default_brightness() -> u8 {
        50
    }

    pub fn pixel_map(&self) -> PixelMap {
        PixelMap::new(self.channel_pixels.clone())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    pub address: u8,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { address: 0x3C }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestrationConfig {
    pub strategy: Strategy,
    pub inter_channel_ms: u64,
    pub cycle_timeout_ms: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            inter_channel_ms: 10,
            cycle_timeout_ms: 10_000,
        }
    }
}

impl OrchestrationConfig {
    pub fn inter_channel_gap(&self) -> Duration {
        Duration::from_millis(self.inter_channel_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

impl FixtureConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: FixtureConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let references = &self.channels.reference_resistances_ohms;
        if references.is_empty() || references.len() > MUX_INPUTS {
            return Err(invalid(format!(
                "channels.reference_resistances_ohms needs 1..={MUX_INPUTS} entries (got {})",
                references.len()
            )));
        }
        if let Some((channel, ohms)) = references
            .iter()
            .enumerate()
            .find(|(_, r)| !r.is_finite() || **r <= 0.0)
        {
            return Err(invalid(format!(
                "reference resistance for channel {channel} must be positive (got {ohms})"
            )));
        }

        ClassificationBands::new(&self.bands)?;

        let exc = &self.excitation;
        if !exc.nominal_voltage_v.is_finite() || exc.nominal_voltage_v <= 0.0 {
            return Err(invalid("excitation.nominal_voltage_v must be positive"));
        }
        if !exc.plausibility_floor_v.is_finite() || exc.plausibility_floor_v < 0.0 {
            return Err(invalid("excitation.plausibility_floor_v must be non-negative"));
        }

        if self.adc.samples == 0 {
            return Err(invalid("adc.samples must be at least 1"));
        }

        if let Some(monitor) = &self.bus_monitor {
            if !(monitor.shunt_ohms > 0.0 && monitor.shunt_ohms.is_finite())
                || !(monitor.max_expected_amps > 0.0 && monitor.max_expected_amps.is_finite())
            {
                return Err(invalid(
                    "bus_monitor.shunt_ohms and max_expected_amps must be positive",
                ));
            }
        }

        if let Some(ind) = &self.indicators {
            if ind.channel_pixels.len() != references.len() {
                return Err(invalid(format!(
                    "indicators.channel_pixels maps {} channels, fixture has {}",
                    ind.channel_pixels.len(),
                    references.len()
                )));
            }
            let mut seen = HashSet::new();
            for (channel, &pixel) in ind.channel_pixels.iter().enumerate() {
                if pixel >= ind.pixel_count {
                    return Err(invalid(format!(
                        "channel {channel} mapped to pixel {pixel}, ring has {}",
                        ind.pixel_count
                    )));
                }
                if !seen.insert(pixel) {
                    return Err(invalid(format!("pixel {pixel} mapped twice")));
                }
            }
        }

        if self.orchestration.cycle_timeout_ms == 0 {
            return Err(invalid("orchestration.cycle_timeout_ms must be non-zero"));
        }
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.reference_resistances_ohms.len()
    }

    pub fn reference_table(&self) -> ReferenceTable {
        ReferenceTable::new(self.channels.reference_resistances_ohms.clone())
    }

    pub fn classification_bands(&self) -> Result<ClassificationBands, ConfigError> {
        ClassificationBands::new(&self.bands)
    }
}
