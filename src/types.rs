// src/types.rs
use std::fmt;

use serde::Serialize;

/// Finite stand-in for an undefined or infinite divider result (ohms).
///
/// Large enough to sit in the terminal FAIL band for any valid band set,
/// small enough to survive a JSON round-trip exactly.
pub const OPEN_CIRCUIT_OHMS: f64 = 1.0e9;

/// Health of one electrode channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Good,
    Acceptable,
    Bad,
    Fail,
    /// The ADC could not be read for this channel.
    NoDevice,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "GOOD",
            Self::Acceptable => "ACCEPTABLE",
            Self::Bad => "BAD",
            Self::Fail => "FAIL",
            Self::NoDevice => "NO_DEVICE",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indicator color pushed to the LED ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);
    pub const GREEN: Rgb = Rgb::new(0, 255, 0);
    // full red + green; the ring has no separate amber die
    pub const AMBER: Rgb = Rgb::new(255, 255, 0);
    pub const RED: Rgb = Rgb::new(255, 0, 0);
    pub const BLUE: Rgb = Rgb::new(0, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scales every component by `brightness / 256`, rounding down;
    /// 255 leaves the color untouched.
    pub fn scaled(self, brightness: u8) -> Self {
        let scale = |c: u8| ((u16::from(c) * (u16::from(brightness) + 1)) >> 8) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }
}

/// Result of one channel in one measurement cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChannelReading {
    pub channel_index: usize,
    pub raw_voltage: f64,
    pub impedance_ohms: f64,
    pub status: ChannelStatus,
    pub indicator_color: Rgb,
}

impl ChannelReading {
    /// Placeholder for a channel whose ADC read failed or never completed.
    pub fn no_device(channel_index: usize) -> Self {
        Self {
            channel_index,
            raw_voltage: 0.0,
            impedance_ohms: OPEN_CIRCUIT_OHMS,
            status: ChannelStatus::NoDevice,
            indicator_color: Rgb::BLUE,
        }
    }

    pub fn is_open_circuit(&self) -> bool {
        self.impedance_ohms >= OPEN_CIRCUIT_OHMS
    }
}

/// Instantaneous excitation rail telemetry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BusSample {
    pub voltage_v: f64,
    pub current_ma: f64,
}

/// Everything one measurement cycle produced, in channel order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeasurementResult {
    pub channels: Vec<ChannelReading>,
    pub bus_voltage_v: f64,
    pub bus_current_ma: f64,
    /// Voltage actually used to solve the divider (live rail or fallback).
    pub excitation_voltage: f64,
    pub electrode_count: usize,
}

impl MeasurementResult {
    pub fn channel(&self, index: usize) -> Option<&ChannelReading> {
        self.channels.get(index)
    }

    pub fn count_with(&self, status: ChannelStatus) -> usize {
        self.channels.iter().filter(|c| c.status == status).count()
    }
}

/// Flat payload handed to the persistence collaborator.
///
/// Field names match what the web service stores. `resistances` carries
/// impedance in ohms, `bus_voltage` volts and `current` milliamps.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TestReport {
    pub message: String,
    pub channels: Vec<usize>,
    pub voltages: Vec<f64>,
    pub resistances: Vec<f64>,
    pub statuses: Vec<ChannelStatus>,
    pub electrode_count: usize,
    pub bus_voltage: f64,
    pub current: f64,
    pub excitation_voltage: f64,
    pub impedance_unit: &'static str,
}

impl From<&MeasurementResult> for TestReport {
    fn from(result: &MeasurementResult) -> Self {
        Self {
            message: "Test completed".to_owned(),
            channels: result.channels.iter().map(|c| c.channel_index).collect(),
            voltages: result.channels.iter().map(|c| c.raw_voltage).collect(),
            resistances: result.channels.iter().map(|c| c.impedance_ohms).collect(),
            statuses: result.channels.iter().map(|c| c.status).collect(),
            electrode_count: result.electrode_count,
            bus_voltage: result.bus_voltage_v,
            current: result.bus_current_ma,
            excitation_voltage: result.excitation_voltage,
            impedance_unit: "ohm",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(channel_index: usize, impedance_ohms: f64, status: ChannelStatus) -> ChannelReading {
        ChannelReading {
            channel_index,
            raw_voltage: 1.0,
            impedance_ohms,
            status,
            indicator_color: Rgb::GREEN,
        }
    }

    #[test]
    fn brightness_scales_components() {
        assert_eq!(Rgb::AMBER.scaled(255), Rgb::AMBER);
        assert_eq!(Rgb::AMBER.scaled(50), Rgb::new(50, 50, 0));
        assert_eq!(Rgb::BLUE.scaled(0), Rgb::OFF);
    }

    #[test]
    fn no_device_reading_is_finite_and_blue() {
        let r = ChannelReading::no_device(2);
        assert_eq!(r.channel_index, 2);
        assert_eq!(r.status, ChannelStatus::NoDevice);
        assert!(r.impedance_ohms.is_finite());
        assert!(r.is_open_circuit());
        assert_eq!(r.indicator_color, Rgb::BLUE);
    }

    #[test]
    fn report_keeps_channel_order_and_units() {
        let result = MeasurementResult {
            channels: vec![
                reading(0, 4700.0, ChannelStatus::Good),
                ChannelReading::no_device(1),
            ],
            bus_voltage_v: 3.28,
            bus_current_ma: 12.5,
            excitation_voltage: 3.28,
            electrode_count: 2,
        };
        let report = TestReport::from(&result);
        assert_eq!(report.channels, vec![0, 1]);
        assert_eq!(report.resistances, vec![4700.0, OPEN_CIRCUIT_OHMS]);
        assert_eq!(report.impedance_unit, "ohm");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["statuses"][0], "GOOD");
        assert_eq!(json["statuses"][1], "NO_DEVICE");
        assert_eq!(json["resistances"][1].as_f64(), Some(OPEN_CIRCUIT_OHMS));
        assert_eq!(json["current"].as_f64(), Some(12.5));
    }

    #[test]
    fn count_with_filters_by_status() {
        let result = MeasurementResult {
            channels: vec![
                reading(0, 100.0, ChannelStatus::Good),
                reading(1, 200.0, ChannelStatus::Good),
                ChannelReading::no_device(2),
            ],
            bus_voltage_v: 0.0,
            bus_current_ma: 0.0,
            excitation_voltage: 3.3,
            electrode_count: 3,
        };
        assert_eq!(result.count_with(ChannelStatus::Good), 2);
        assert_eq!(result.count_with(ChannelStatus::NoDevice), 1);
        assert_eq!(result.channel(2).map(|c| c.status), Some(ChannelStatus::NoDevice));
    }
}
