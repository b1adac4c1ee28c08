//! Simulated electrode fixture.
//!
//! Emulates the register maps of the ADS1115 (0x48) and INA219 (0x40), an
//! acknowledging display at 0x3C, the MOSFET gate, and the four
//! electrode/reference dividers behind them. The binary runs against it
//! when no hardware backend is wired in, and the tests use it to drive
//! whole measurement cycles.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use embedded_hal::digital::{self, OutputPin, PinState};
use embedded_hal::i2c::{self, ErrorKind, I2c, NoAcknowledgeSource, Operation};
use rand::Rng;

use crate::drivers::ads1115::{self, channel_from_config_word, Gain};
use crate::drivers::excitation::Polarity;
use crate::drivers::feedback::{PixelSink, TextSink};
use crate::drivers::{ina219, FixtureError};
use crate::types::Rgb;

pub const DISPLAY_ADDRESS: u8 = 0x3C;

/// Shunt fitted on the simulated INA219 board.
const SIM_SHUNT_OHMS: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimBusError {
    NoAcknowledge(u8),
}

impl i2c::Error for SimBusError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
    }
}

pub struct SimState {
    supply_v: f64,
    references: Vec<f64>,
    electrodes: Vec<f64>,
    gate: Polarity,
    pin_level: Option<PinState>,
    powered: bool,
    adc_present: bool,
    monitor_present: bool,
    display_present: bool,
    faulty: Vec<usize>,
    delays: Vec<Duration>,
    scripts: Vec<VecDeque<i16>>,
    noise_lsb: f64,
    ads_config: u16,
    ads_pointer: u8,
    ina_pointer: u8,
    ina_registers: [u16; 6],
    transactions: usize,
}

impl SimState {
    fn divider_volts(&self, channel: usize) -> f64 {
        if !self.powered {
            return 0.0;
        }
        match (self.references.get(channel), self.electrodes.get(channel)) {
            (Some(&rs), Some(&z)) if z.is_finite() => self.supply_v * rs / (rs + z),
            _ => 0.0,
        }
    }

    fn rail_current_a(&self) -> f64 {
        if !self.powered {
            return 0.0;
        }
        self.references
            .iter()
            .zip(&self.electrodes)
            .filter(|(_, z)| z.is_finite())
            .map(|(rs, z)| self.supply_v / (rs + z))
            .sum()
    }

    fn conversion(&mut self) -> Result<i16, SimBusError> {
        let channel = channel_from_config_word(self.ads_config).unwrap_or(0);
        if self.faulty.contains(&channel) {
            return Err(SimBusError::NoAcknowledge(ads1115::DEFAULT_ADDRESS));
        }
        if let Some(delay) = self.delays.get(channel).copied() {
            thread::sleep(delay);
        }
        if let Some(counts) = self.scripts.get_mut(channel).and_then(VecDeque::pop_front) {
            return Ok(counts);
        }
        let mut volts = self.divider_volts(channel);
        let gain = Gain::from_config_word(self.ads_config);
        if self.noise_lsb > 0.0 {
            let lsb = gain.counts_to_volts(1.0);
            volts += rand::thread_rng().gen_range(-self.noise_lsb..=self.noise_lsb) * lsb;
        }
        Ok(gain.volts_to_counts(volts))
    }

    fn ads_transaction(&mut self, operations: &mut [Operation<'_>]) -> Result<(), SimBusError> {
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    let Some((&pointer, data)) = bytes.split_first() else {
                        continue;
                    };
                    self.ads_pointer = pointer;
                    if let (0x01, [msb, lsb]) = (pointer, data) {
                        let word = u16::from_be_bytes([*msb, *lsb]);
                        let channel = channel_from_config_word(word).unwrap_or(0);
                        if self.faulty.contains(&channel) {
                            return Err(SimBusError::NoAcknowledge(ads1115::DEFAULT_ADDRESS));
                        }
                        self.ads_config = word;
                    }
                }
                Operation::Read(buf) => {
                    let value = match self.ads_pointer {
                        0x00 => self.conversion()? as u16,
                        // OS bit set: conversion finished
                        0x01 => (self.ads_config & 0x7FFF) | 0x8000,
                        _ => 0,
                    };
                    fill(buf, value);
                }
            }
        }
        Ok(())
    }

    fn ina_transaction(&mut self, operations: &mut [Operation<'_>]) -> Result<(), SimBusError> {
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    let Some((&pointer, data)) = bytes.split_first() else {
                        continue;
                    };
                    self.ina_pointer = pointer;
                    if let ([msb, lsb], Some(reg)) =
                        (data, self.ina_registers.get_mut(usize::from(pointer)))
                    {
                        *reg = u16::from_be_bytes([*msb, *lsb]);
                    }
                }
                Operation::Read(buf) => {
                    let value = match self.ina_pointer {
                        0x02 => self.ina_bus_voltage_register(),
                        0x04 => self.ina_current_register(),
                        p => self
                            .ina_registers
                            .get(usize::from(p))
                            .copied()
                            .unwrap_or(0),
                    };
                    fill(buf, value);
                }
            }
        }
        Ok(())
    }

    fn ina_bus_voltage_register(&self) -> u16 {
        let volts = if self.powered { self.supply_v } else { 0.0 };
        ((volts / 0.004).round() as u16) << 3
    }

    fn ina_current_register(&self) -> u16 {
        let cal = self.ina_registers[0x05];
        if cal == 0 {
            return 0;
        }
        let lsb = 0.04096 / (f64::from(cal) * SIM_SHUNT_OHMS);
        (self.rail_current_a() / lsb).round() as i16 as u16
    }
}

fn fill(buf: &mut [u8], value: u16) {
    for (dst, src) in buf.iter_mut().zip(value.to_be_bytes()) {
        *dst = src;
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to one simulated fixture; clone freely, all clones share state.
#[derive(Clone)]
pub struct SimulatedFixture {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedFixture {
    /// `electrodes` are in ohms; `f64::INFINITY` is an unplugged lead.
    pub fn new(supply_v: f64, references: Vec<f64>, electrodes: Vec<f64>) -> Self {
        let channels = references.len().max(electrodes.len());
        let state = SimState {
            supply_v,
            references,
            electrodes,
            gate: Polarity::ActiveHigh,
            pin_level: None,
            powered: false,
            adc_present: true,
            monitor_present: true,
            display_present: true,
            faulty: Vec::new(),
            delays: vec![Duration::ZERO; channels],
            scripts: vec![VecDeque::new(); channels],
            noise_lsb: 0.0,
            ads_config: 0,
            ads_pointer: 0,
            ina_pointer: 0,
            ina_registers: [0; 6],
            transactions: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// How the MOSFET gate is wired on this board.
    pub fn with_gate(self, gate: Polarity) -> Self {
        lock(&self.state).gate = gate;
        self
    }

    pub fn with_fault(self, channel: usize) -> Self {
        self.set_fault(channel, true);
        self
    }

    pub fn with_channel_delay(self, channel: usize, delay: Duration) -> Self {
        if let Some(slot) = lock(&self.state).delays.get_mut(channel) {
            *slot = delay;
        }
        self
    }

    /// Raw counts returned by the next conversions on `channel`, in order.
    pub fn with_conversion_script(self, channel: usize, counts: Vec<i16>) -> Self {
        if let Some(queue) = lock(&self.state).scripts.get_mut(channel) {
            queue.extend(counts);
        }
        self
    }

    pub fn with_noise(self, lsb: f64) -> Self {
        lock(&self.state).noise_lsb = lsb.abs();
        self
    }

    pub fn without_adc(self) -> Self {
        lock(&self.state).adc_present = false;
        self
    }

    pub fn without_bus_monitor(self) -> Self {
        lock(&self.state).monitor_present = false;
        self
    }

    pub fn without_display(self) -> Self {
        lock(&self.state).display_present = false;
        self
    }

    pub fn state(&self) -> Arc<Mutex<SimState>> {
        Arc::clone(&self.state)
    }

    pub fn bus(&self) -> SimBus {
        SimBus::new(self.state())
    }

    pub fn pin(&self) -> SimPin {
        SimPin {
            state: self.state(),
        }
    }

    pub fn set_fault(&self, channel: usize, faulty: bool) {
        let mut state = lock(&self.state);
        state.faulty.retain(|&c| c != channel);
        if faulty {
            state.faulty.push(channel);
        }
    }

    pub fn set_electrode(&self, channel: usize, ohms: f64) {
        if let Some(slot) = lock(&self.state).electrodes.get_mut(channel) {
            *slot = ohms;
        }
    }

    /// Forces the network on or off without going through the gate pin.
    pub fn power(&self, on: bool) {
        lock(&self.state).powered = on;
    }

    pub fn powered(&self) -> bool {
        lock(&self.state).powered
    }

    pub fn pin_level(&self) -> Option<PinState> {
        lock(&self.state).pin_level
    }

    /// I2C transactions seen so far, across every device.
    pub fn transactions(&self) -> usize {
        lock(&self.state).transactions
    }
}

pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    pub fn new(state: Arc<Mutex<SimState>>) -> Self {
        Self { state }
    }
}

impl i2c::ErrorType for SimBus {
    type Error = SimBusError;
}

impl I2c for SimBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = lock(&self.state);
        state.transactions += 1;
        match address {
            ads1115::DEFAULT_ADDRESS if state.adc_present => state.ads_transaction(operations),
            ina219::DEFAULT_ADDRESS if state.monitor_present => state.ina_transaction(operations),
            DISPLAY_ADDRESS if state.display_present => Ok(()),
            _ => Err(SimBusError::NoAcknowledge(address)),
        }
    }
}

pub struct SimPin {
    state: Arc<Mutex<SimState>>,
}

impl SimPin {
    fn set(&mut self, level: PinState) {
        let mut state = lock(&self.state);
        state.pin_level = Some(level);
        state.powered = level == state.gate.level(true);
    }
}

impl digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(PinState::Low);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(PinState::High);
        Ok(())
    }
}

struct RingFrame {
    pixels: Vec<Rgb>,
    shown: usize,
    failing: bool,
}

/// In-memory LED ring; clones share the same frame.
#[derive(Clone)]
pub struct MemoryRing {
    inner: Arc<Mutex<RingFrame>>,
}

impl MemoryRing {
    pub fn new(pixel_count: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RingFrame {
                pixels: vec![Rgb::OFF; pixel_count],
                shown: 0,
                failing: false,
            })),
        }
    }

    /// A ring whose every write fails, as if unplugged.
    pub fn failing(pixel_count: usize) -> Self {
        let ring = Self::new(pixel_count);
        ring.frame().failing = true;
        ring
    }

    fn frame(&self) -> MutexGuard<'_, RingFrame> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn preset(&self, index: usize, color: Rgb) {
        if let Some(p) = self.frame().pixels.get_mut(index) {
            *p = color;
        }
    }

    pub fn pixels(&self) -> Vec<Rgb> {
        self.frame().pixels.clone()
    }

    pub fn frames_shown(&self) -> usize {
        self.frame().shown
    }
}

impl PixelSink for MemoryRing {
    fn pixel_count(&self) -> usize {
        self.frame().pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<(), FixtureError> {
        let mut frame = self.frame();
        if frame.failing {
            return Err(FixtureError::peripheral("LED ring", "not responding"));
        }
        match frame.pixels.get_mut(index) {
            Some(p) => {
                *p = color;
                Ok(())
            }
            None => Err(FixtureError::peripheral("LED ring", format!("no pixel {index}"))),
        }
    }

    fn show(&mut self) -> Result<(), FixtureError> {
        let mut frame = self.frame();
        if frame.failing {
            return Err(FixtureError::peripheral("LED ring", "not responding"));
        }
        frame.shown += 1;
        Ok(())
    }
}

struct Panel {
    lines: Vec<String>,
    failing: bool,
}

/// In-memory text panel; clones share the same contents.
#[derive(Clone)]
pub struct MemoryDisplay {
    inner: Arc<Mutex<Panel>>,
}

impl MemoryDisplay {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Panel {
                lines: Vec::new(),
                failing: false,
            })),
        }
    }

    pub fn failing() -> Self {
        let display = Self::new();
        display.panel().failing = true;
        display
    }

    fn panel(&self) -> MutexGuard<'_, Panel> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn lines(&self) -> Vec<String> {
        self.panel().lines.clone()
    }
}

impl Default for MemoryDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl TextSink for MemoryDisplay {
    fn draw_lines(&mut self, lines: &[String]) -> Result<(), FixtureError> {
        let mut panel = self.panel();
        if panel.failing {
            return Err(FixtureError::peripheral("display", "not responding"));
        }
        panel.lines = lines.to_vec();
        Ok(())
    }
}
