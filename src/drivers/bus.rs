//! Shared I2C bus.
//!
//! The ADC, the bus monitor and the display all hang off the same I2C
//! bus. Each driver gets its own [`MutexDevice`] over one mutex, so two
//! drivers can never interleave bytes on the wire. Multi-transaction
//! sequences that must stay atomic (one ADC channel conversion) are
//! serialized one level up by the driver's own lock.

use std::sync::Mutex;

use embedded_hal::i2c::I2c;
use embedded_hal_bus::i2c::MutexDevice;
use log::info;

/// First and one-past-last addresses probed by [`scan`]; the rest are reserved.
const SCAN_FIRST: u8 = 0x03;
const SCAN_END: u8 = 0x78;

pub type SharedBus<I2C> = &'static Mutex<I2C>;

/// Puts `bus` behind a mutex that lives for the rest of the process.
/// Channel workers outlive any one borrow, so drivers need a `'static` bus.
pub fn share<I2C: Send>(bus: I2C) -> SharedBus<I2C> {
    Box::leak(Box::new(Mutex::new(bus)))
}

/// One driver's handle onto the shared bus.
pub fn device<I2C: I2c>(bus: SharedBus<I2C>) -> MutexDevice<'static, I2C> {
    MutexDevice::new(bus)
}

/// True when something ACKs at `address`.
pub fn probe<I2C: I2c>(bus: &mut I2C, address: u8) -> bool {
    bus.write(address, &[0]).is_ok()
}

/// Probes every non-reserved 7-bit address and returns the ones that ACK.
pub fn scan<I2C: I2c>(bus: &mut I2C) -> Vec<u8> {
    let found: Vec<u8> = (SCAN_FIRST..SCAN_END)
        .filter(|&addr| probe(bus, addr))
        .collect();
    if found.is_empty() {
        info!("I2C scan: no devices found");
    } else {
        let listed: Vec<String> = found.iter().map(|a| format!("{a:#04x}")).collect();
        info!("I2C scan: devices at {}", listed.join(", "));
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sim::{SimBus, SimulatedFixture, DISPLAY_ADDRESS};

    #[test]
    fn scan_finds_simulated_devices() {
        let fixture = SimulatedFixture::new(3.3, vec![10_000.0; 4], vec![10_000.0; 4]);
        let mut bus = SimBus::new(fixture.state());
        assert_eq!(scan(&mut bus), vec![0x3C, 0x40, 0x48]);
    }

    #[test]
    fn scan_skips_absent_peripherals() {
        let fixture = SimulatedFixture::new(3.3, vec![10_000.0; 4], vec![10_000.0; 4])
            .without_bus_monitor()
            .without_display();
        let mut bus = SimBus::new(fixture.state());
        assert_eq!(scan(&mut bus), vec![0x48]);
        assert!(!probe(&mut bus, DISPLAY_ADDRESS));
    }

    #[test]
    fn devices_share_one_bus() {
        let fixture = SimulatedFixture::new(3.3, vec![10_000.0; 4], vec![10_000.0; 4]);
        let shared = share(fixture.bus());
        let mut adc = device(shared);
        let mut monitor = device(shared);
        assert!(adc.write(0x48, &[0x00]).is_ok());
        assert!(monitor.write(0x40, &[0x00]).is_ok());
        assert_eq!(fixture.transactions(), 2);
    }
}
