use embedded_hal::i2c::I2c;

use crate::drivers::FixtureError;
use crate::types::BusSample;

pub const DEFAULT_ADDRESS: u8 = 0x40;

const DEVICE: &str = "INA219";
const REG_CONFIG: u8 = 0x00;
const REG_BUS_VOLTAGE: u8 = 0x02;
const REG_CURRENT: u8 = 0x04;
const REG_CALIBRATION: u8 = 0x05;

/// 32 V bus range, ±320 mV shunt range, 12-bit, continuous shunt + bus.
const CONFIG_32V_320MV_CONTINUOUS: u16 = 0x399F;
const BUS_VOLTAGE_LSB_V: f64 = 0.004;
/// Fixed scaling constant from the datasheet calibration equation.
const CALIBRATION_SCALE: f64 = 0.04096;

/// Source of excitation-rail telemetry.
pub trait BusMonitor: Send {
    fn sample(&mut self) -> Result<BusSample, FixtureError>;
}

/// Calibration register value and the resulting current LSB (amps/bit).
pub fn calibration(shunt_ohms: f64, max_expected_amps: f64) -> (u16, f64) {
    let current_lsb = max_expected_amps / 32768.0;
    let cal = (CALIBRATION_SCALE / (current_lsb * shunt_ohms))
        .trunc()
        .clamp(1.0, f64::from(u16::MAX - 1)) as u16;
    // bit 0 of the register is read-only zero
    let cal = cal & !1;
    (cal, CALIBRATION_SCALE / (f64::from(cal) * shunt_ohms))
}

pub struct Ina219<I2C> {
    bus: I2C,
    address: u8,
    calibration: u16,
    current_lsb_a: f64,
}

impl<I2C: I2c> Ina219<I2C> {
    pub fn new(bus: I2C, address: u8, shunt_ohms: f64, max_expected_amps: f64) -> Self {
        let (calibration, current_lsb_a) = calibration(shunt_ohms, max_expected_amps);
        Self {
            bus,
            address,
            calibration,
            current_lsb_a,
        }
    }

    /// Writes the operating mode and calibration. Must run before sampling,
    /// otherwise the current register reads zero.
    pub fn configure(&mut self) -> Result<(), FixtureError> {
        self.write_register(REG_CONFIG, CONFIG_32V_320MV_CONTINUOUS)?;
        self.write_register(REG_CALIBRATION, self.calibration)
    }

    pub fn bus_voltage(&mut self) -> Result<f64, FixtureError> {
        let raw = self.read_register(REG_BUS_VOLTAGE)?;
        Ok(f64::from(raw >> 3) * BUS_VOLTAGE_LSB_V)
    }

    pub fn current_ma(&mut self) -> Result<f64, FixtureError> {
        let raw = self.read_register(REG_CURRENT)? as i16;
        Ok(f64::from(raw) * self.current_lsb_a * 1000.0)
    }

    fn write_register(&mut self, register: u8, value: u16) -> Result<(), FixtureError> {
        let [msb, lsb] = value.to_be_bytes();
        self.bus
            .write(self.address, &[register, msb, lsb])
            .map_err(|e| FixtureError::transport(DEVICE, e))
    }

    fn read_register(&mut self, register: u8) -> Result<u16, FixtureError> {
        let mut buf = [0u8; 2];
        self.bus
            .write_read(self.address, &[register], &mut buf)
            .map_err(|e| FixtureError::transport(DEVICE, e))?;
        Ok(u16::from_be_bytes(buf))
    }
}

impl<I2C: I2c + Send> BusMonitor for Ina219<I2C> {
    fn sample(&mut self) -> Result<BusSample, FixtureError> {
        Ok(BusSample {
            voltage_v: self.bus_voltage()?,
            current_ma: self.current_ma()?,
        })
    }
}
