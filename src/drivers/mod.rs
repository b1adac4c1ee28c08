// src/drivers/mod.rs
// Hardware seams and the per-channel measurement pipeline.
pub mod ads1115;
pub mod bus;
pub mod classify;
pub mod error;
pub mod excitation;
pub mod feedback;
pub mod impedance;
pub mod ina219;
pub mod orchestrator;
pub mod sim;

pub use ads1115::{Ads1115, ChannelReader, Gain, SampleTiming, StabilizedReader};
pub use bus::{probe, scan, share, SharedBus};
pub use classify::{ClassificationBands, Thresholds};
pub use error::FixtureError;
pub use excitation::{AfterCycle, ExcitationSwitch, Polarity};
pub use feedback::{IndicatorStrip, PixelMap, PixelSink, StatusDisplay, TextSink};
pub use ina219::{BusMonitor, Ina219};
pub use orchestrator::{ChannelPipeline, Orchestrator, Strategy};
pub use sim::SimulatedFixture;
