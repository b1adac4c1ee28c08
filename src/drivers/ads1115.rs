//! ADS1115 single-ended reads with mux settling.
//!
//! A high-impedance electrode charges the converter's sample-and-hold
//! capacitor slowly, so the first conversion after a mux switch reads a
//! stale value. [`StabilizedReader`] throws that conversion away, waits
//! for the input to settle, then averages a few conversions.

use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use embedded_hal::i2c::I2c;
use serde::Deserialize;

use crate::drivers::FixtureError;

pub const DEFAULT_ADDRESS: u8 = 0x48;
/// Single-ended inputs AIN0..AIN3.
pub const MUX_INPUTS: usize = 4;

const DEVICE: &str = "ADS1115";
const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

const OS_START: u16 = 1 << 15;
const MUX_SINGLE_ENDED: u16 = 0b100;
const MODE_SINGLE_SHOT: u16 = 1 << 8;
const DR_128_SPS: u16 = 0b100 << 5;
const COMP_QUEUE_DISABLE: u16 = 0b11;

const FULL_SCALE_COUNTS: f64 = 32768.0;

/// Programmable gain, named by full-scale range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gain {
    Fsr6v144,
    #[default]
    Fsr4v096,
    Fsr2v048,
    Fsr1v024,
    Fsr0v512,
    Fsr0v256,
}

impl Gain {
    pub fn full_scale_volts(self) -> f64 {
        match self {
            Gain::Fsr6v144 => 6.144,
            Gain::Fsr4v096 => 4.096,
            Gain::Fsr2v048 => 2.048,
            Gain::Fsr1v024 => 1.024,
            Gain::Fsr0v512 => 0.512,
            Gain::Fsr0v256 => 0.256,
        }
    }

    fn pga_bits(self) -> u16 {
        match self {
            Gain::Fsr6v144 => 0b000,
            Gain::Fsr4v096 => 0b001,
            Gain::Fsr2v048 => 0b010,
            Gain::Fsr1v024 => 0b011,
            Gain::Fsr0v512 => 0b100,
            Gain::Fsr0v256 => 0b101,
        }
    }

    /// Decodes the PGA field of a config word (0b110 and 0b111 alias 0.256 V).
    pub fn from_config_word(word: u16) -> Gain {
        match (word >> 9) & 0b111 {
            0b000 => Gain::Fsr6v144,
            0b001 => Gain::Fsr4v096,
            0b010 => Gain::Fsr2v048,
            0b011 => Gain::Fsr1v024,
            0b100 => Gain::Fsr0v512,
            _ => Gain::Fsr0v256,
        }
    }

    pub fn counts_to_volts(self, counts: f64) -> f64 {
        counts * self.full_scale_volts() / FULL_SCALE_COUNTS
    }

    pub fn volts_to_counts(self, volts: f64) -> i16 {
        let counts = (volts * FULL_SCALE_COUNTS / self.full_scale_volts()).round();
        counts.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
    }
}

/// Config register value that starts one single-shot conversion on `channel`.
pub fn config_word(channel: usize, gain: Gain) -> Result<u16, FixtureError> {
    if channel >= MUX_INPUTS {
        return Err(FixtureError::ChannelOutOfRange {
            channel,
            limit: MUX_INPUTS,
        });
    }
    let mux = MUX_SINGLE_ENDED | channel as u16;
    Ok(OS_START
        | (mux << 12)
        | (gain.pga_bits() << 9)
        | MODE_SINGLE_SHOT
        | DR_128_SPS
        | COMP_QUEUE_DISABLE)
}

/// Channel selected by the MUX field of a single-ended config word.
pub fn channel_from_config_word(word: u16) -> Option<usize> {
    let mux = (word >> 12) & 0b111;
    (mux & MUX_SINGLE_ENDED != 0).then(|| usize::from(mux & 0b011))
}

pub struct Ads1115<I2C> {
    bus: I2C,
    address: u8,
    gain: Gain,
    conversion_delay: Duration,
}

impl<I2C: I2c> Ads1115<I2C> {
    pub fn new(bus: I2C, address: u8, gain: Gain, conversion_delay: Duration) -> Self {
        Self {
            bus,
            address,
            gain,
            conversion_delay,
        }
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    /// One single-shot conversion, in signed counts.
    pub fn read_raw(&mut self, channel: usize) -> Result<i16, FixtureError> {
        let [msb, lsb] = config_word(channel, self.gain)?.to_be_bytes();
        self.bus
            .write(self.address, &[REG_CONFIG, msb, lsb])
            .map_err(|e| FixtureError::transport(DEVICE, e))?;
        thread::sleep(self.conversion_delay);
        let mut buf = [0u8; 2];
        self.bus
            .write_read(self.address, &[REG_CONVERSION], &mut buf)
            .map_err(|e| FixtureError::transport(DEVICE, e))?;
        Ok(i16::from_be_bytes(buf))
    }
}

/// Waits and sample count for one stabilized read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleTiming {
    pub mux_settle: Duration,
    pub sample_interval: Duration,
    pub samples: usize,
}

impl Default for SampleTiming {
    fn default() -> Self {
        Self {
            mux_settle: Duration::from_millis(10),
            sample_interval: Duration::from_millis(2),
            samples: 3,
        }
    }
}

/// Anything that can produce one settled voltage for a channel.
///
/// Implementations must be safe to call from several channel workers at
/// once; a shared transport serializes internally.
pub trait ChannelReader: Send + Sync {
    fn read_channel(&self, channel: usize) -> Result<f64, FixtureError>;
}

pub struct StabilizedReader<I2C> {
    adc: Mutex<Ads1115<I2C>>,
    timing: SampleTiming,
}

impl<I2C: I2c> StabilizedReader<I2C> {
    pub fn new(adc: Ads1115<I2C>, timing: SampleTiming) -> Self {
        Self {
            adc: Mutex::new(adc),
            timing,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ads1115<I2C>> {
        self.adc.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<I2C: I2c + Send> ChannelReader for StabilizedReader<I2C> {
    fn read_channel(&self, channel: usize) -> Result<f64, FixtureError> {
        // Held for the whole sequence: another channel's config write between
        // our dummy read and our samples would move the mux under us.
        let mut adc = self.lock();
        adc.read_raw(channel)?;
        thread::sleep(self.timing.mux_settle);

        let samples = self.timing.samples.max(1);
        let mut total = 0.0;
        for i in 0..samples {
            if i > 0 {
                thread::sleep(self.timing.sample_interval);
            }
            total += f64::from(adc.read_raw(channel)?);
        }
        Ok(adc.gain().counts_to_volts(total / samples as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sim::SimulatedFixture;

    fn fast_timing(samples: usize) -> SampleTiming {
        SampleTiming {
            mux_settle: Duration::ZERO,
            sample_interval: Duration::ZERO,
            samples,
        }
    }

    fn reader(fixture: &SimulatedFixture, samples: usize) -> StabilizedReader<crate::drivers::sim::SimBus> {
        let adc = Ads1115::new(fixture.bus(), DEFAULT_ADDRESS, Gain::Fsr4v096, Duration::ZERO);
        StabilizedReader::new(adc, fast_timing(samples))
    }

    #[test]
    fn config_word_matches_datasheet_layout() {
        assert_eq!(config_word(0, Gain::Fsr4v096).unwrap(), 0xC383);
        assert_eq!(config_word(3, Gain::Fsr4v096).unwrap(), 0xF383);
        assert_eq!(config_word(1, Gain::Fsr6v144).unwrap(), 0xD183);
        assert_eq!(channel_from_config_word(0xF383), Some(3));
        assert_eq!(Gain::from_config_word(0xD183), Gain::Fsr6v144);
    }

    #[test]
    fn out_of_range_channel_is_rejected() {
        assert!(matches!(
            config_word(4, Gain::Fsr4v096),
            Err(FixtureError::ChannelOutOfRange { channel: 4, limit: 4 })
        ));
    }

    #[test]
    fn counts_scale_to_volts() {
        let gain = Gain::Fsr4v096;
        assert!((gain.counts_to_volts(32768.0) - 4.096).abs() < 1e-12);
        assert!((gain.counts_to_volts(8.0) - 0.001).abs() < 1e-12);
        assert_eq!(gain.volts_to_counts(1.65), 13200);
        assert_eq!(gain.volts_to_counts(10.0), i16::MAX);
    }

    #[test]
    fn stabilized_read_discards_first_conversion() {
        let fixture = SimulatedFixture::new(3.3, vec![10_000.0; 4], vec![10_000.0; 4]);
        fixture.power(true);
        let reader = reader(&fixture, 3);
        let v = reader.read_channel(1).unwrap();
        assert!((v - 1.65).abs() < 1e-3);
        // dummy + 3 samples, each a config write plus a conversion read
        assert_eq!(fixture.transactions(), 8);
    }

    #[test]
    fn stabilized_read_averages_samples() {
        let fixture = SimulatedFixture::new(3.3, vec![10_000.0; 4], vec![10_000.0; 4])
            .with_conversion_script(1, vec![999, 1000, 2000, 3000]);
        fixture.power(true);
        let reader = reader(&fixture, 3);
        let v = reader.read_channel(1).unwrap();
        assert!((v - Gain::Fsr4v096.counts_to_volts(2000.0)).abs() < 1e-12);
    }

    #[test]
    fn bus_fault_surfaces_as_transport_error() {
        let fixture =
            SimulatedFixture::new(3.3, vec![10_000.0; 4], vec![10_000.0; 4]).with_fault(2);
        fixture.power(true);
        let reader = reader(&fixture, 3);
        assert!(matches!(
            reader.read_channel(2),
            Err(FixtureError::Transport { device: "ADS1115", .. })
        ));
        assert!(reader.read_channel(0).is_ok());
    }

    #[test]
    fn unpowered_fixture_reads_zero() {
        let fixture = SimulatedFixture::new(3.3, vec![10_000.0; 4], vec![10_000.0; 4]);
        let reader = reader(&fixture, 3);
        assert_eq!(reader.read_channel(0).unwrap(), 0.0);
    }
}
