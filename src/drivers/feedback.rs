//! LED ring and status display.
//!
//! Both are optional and best-effort: callers log their errors and carry
//! on. The wire protocol of the physical parts lives behind
//! [`PixelSink`] / [`TextSink`].

use log::{info, warn};

use crate::drivers::FixtureError;
use crate::types::{ChannelReading, ChannelStatus, MeasurementResult, Rgb};

pub trait PixelSink: Send {
    fn pixel_count(&self) -> usize;
    fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<(), FixtureError>;
    /// Latches the buffered colors onto the LEDs.
    fn show(&mut self) -> Result<(), FixtureError>;
}

pub trait TextSink: Send {
    fn draw_lines(&mut self, lines: &[String]) -> Result<(), FixtureError>;
}

/// Channel index → LED position on the ring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelMap {
    positions: Vec<usize>,
}

impl PixelMap {
    pub fn new(positions: Vec<usize>) -> Self {
        Self { positions }
    }

    pub fn position(&self, channel: usize) -> Option<usize> {
        self.positions.get(channel).copied()
    }
}

pub struct IndicatorStrip {
    sink: Box<dyn PixelSink>,
    map: PixelMap,
    clear_first: bool,
    brightness: u8,
}

impl IndicatorStrip {
    pub fn new(sink: Box<dyn PixelSink>, map: PixelMap, clear_first: bool) -> Self {
        Self {
            sink,
            map,
            clear_first,
            brightness: u8::MAX,
        }
    }

    pub fn with_brightness(mut self, brightness: u8) -> Self {
        self.brightness = brightness;
        self
    }

    /// Blanks the whole ring.
    pub fn clear(&mut self) -> Result<(), FixtureError> {
        for index in 0..self.sink.pixel_count() {
            self.sink.set_pixel(index, Rgb::OFF)?;
        }
        self.sink.show()
    }

    pub fn update(&mut self, readings: &[ChannelReading]) -> Result<(), FixtureError> {
        let count = self.sink.pixel_count();
        if self.clear_first {
            for index in 0..count {
                self.sink.set_pixel(index, Rgb::OFF)?;
            }
        }
        for reading in readings {
            match self.map.position(reading.channel_index) {
                Some(pixel) if pixel < count => {
                    self.sink
                        .set_pixel(pixel, reading.indicator_color.scaled(self.brightness))?;
                }
                Some(pixel) => warn!(
                    "ch{}: pixel {pixel} outside ring of {count}",
                    reading.channel_index
                ),
                None => {}
            }
        }
        self.sink.show()
    }
}

pub struct StatusDisplay {
    sink: Box<dyn TextSink>,
}

impl StatusDisplay {
    pub fn new(sink: Box<dyn TextSink>) -> Self {
        Self { sink }
    }

    pub fn render(
        &mut self,
        result: &MeasurementResult,
        excitation_on: bool,
    ) -> Result<(), FixtureError> {
        self.sink.draw_lines(&summary_lines(result, excitation_on))
    }
}

/// Short text for a 128x64 panel: excitation, impedances in kΩ, rail.
pub fn summary_lines(result: &MeasurementResult, excitation_on: bool) -> Vec<String> {
    let mut lines = vec![format!("EXC: {}", if excitation_on { "ON" } else { "OFF" })];
    for pair in result.channels.chunks(2) {
        let cells: Vec<String> = pair
            .iter()
            .map(|r| format!("Z{}:{}", r.channel_index, kohms_label(r)))
            .collect();
        lines.push(cells.join(" "));
    }
    lines.push(format!(
        "Vin:{:.2}V I:{:.1}mA",
        result.excitation_voltage, result.bus_current_ma
    ));
    lines
}

fn kohms_label(reading: &ChannelReading) -> String {
    if reading.status == ChannelStatus::NoDevice {
        "n/a".to_owned()
    } else if reading.is_open_circuit() {
        "open".to_owned()
    } else {
        format!("{:.1}k", reading.impedance_ohms / 1000.0)
    }
}

/// Ring stand-in that logs the frame instead of clocking it out.
pub struct LogPixelSink {
    pixels: Vec<Rgb>,
}

impl LogPixelSink {
    pub fn new(pixel_count: usize) -> Self {
        Self {
            pixels: vec![Rgb::OFF; pixel_count],
        }
    }
}

impl PixelSink for LogPixelSink {
    fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<(), FixtureError> {
        let slot = self
            .pixels
            .get_mut(index)
            .ok_or_else(|| FixtureError::peripheral("LED ring", format!("no pixel {index}")))?;
        *slot = color;
        Ok(())
    }

    fn show(&mut self) -> Result<(), FixtureError> {
        let lit: Vec<String> = self
            .pixels
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != Rgb::OFF)
            .map(|(i, c)| format!("{i}=#{:02x}{:02x}{:02x}", c.r, c.g, c.b))
            .collect();
        info!("ring: {}", if lit.is_empty() { "dark".to_owned() } else { lit.join(" ") });
        Ok(())
    }
}

pub struct LogTextSink;

impl TextSink for LogTextSink {
    fn draw_lines(&mut self, lines: &[String]) -> Result<(), FixtureError> {
        for line in lines {
            info!("display | {line}");
        }
        Ok(())
    }
}
