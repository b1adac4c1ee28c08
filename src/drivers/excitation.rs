//! MOSFET gate that powers the electrode network.
//!
//! Which pin level means "on" depends on how the gate is wired, and
//! fixtures exist both ways. The polarity is therefore always supplied by
//! configuration; there is no default.

use std::thread;
use std::time::Duration;

use embedded_hal::digital::{OutputPin, PinState};
use log::debug;
use serde::Deserialize;

use crate::drivers::FixtureError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

impl Polarity {
    /// Pin level that puts the switch in the requested state.
    pub fn level(self, on: bool) -> PinState {
        match (self, on) {
            (Polarity::ActiveHigh, true) | (Polarity::ActiveLow, false) => PinState::High,
            (Polarity::ActiveHigh, false) | (Polarity::ActiveLow, true) => PinState::Low,
        }
    }
}

/// What happens to the excitation once a cycle has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterCycle {
    LeaveOn,
    SwitchOff,
}

pub struct ExcitationSwitch<P> {
    pin: P,
    polarity: Polarity,
    settle: Duration,
    enabled: bool,
}

impl<P: OutputPin> ExcitationSwitch<P> {
    /// Takes the pin and immediately drives it to the off level.
    pub fn new(pin: P, polarity: Polarity, settle: Duration) -> Result<Self, FixtureError> {
        let mut switch = Self {
            pin,
            polarity,
            settle,
            enabled: true,
        };
        switch.drive(false)?;
        Ok(switch)
    }

    /// Energizes the network and blocks until the rail has settled.
    pub fn enable(&mut self) -> Result<(), FixtureError> {
        self.drive(true)?;
        thread::sleep(self.settle);
        Ok(())
    }

    pub fn disable(&mut self) -> Result<(), FixtureError> {
        self.drive(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn drive(&mut self, on: bool) -> Result<(), FixtureError> {
        let level = self.polarity.level(on);
        self.pin
            .set_state(level)
            .map_err(|e| FixtureError::Excitation(format!("{e:?}")))?;
        debug!("excitation {} (pin {:?})", if on { "on" } else { "off" }, level);
        self.enabled = on;
        Ok(())
    }
}
