//! Electrode impedance check for a four-channel EEG headset fixture.
//!
//! A divider per channel (electrode in series with a reference resistor)
//! is read through an ADS1115, solved for the electrode impedance and
//! classified into GOOD / ACCEPTABLE / BAD / FAIL bands. See
//! [`fixture::Fixture`] for the full cycle.

pub mod config;
pub mod drivers;
pub mod fixture;
pub mod types;

pub use config::{ConfigError, FixtureConfig};
pub use drivers::FixtureError;
pub use fixture::Fixture;
pub use types::{ChannelReading, ChannelStatus, MeasurementResult, Rgb, TestReport};
