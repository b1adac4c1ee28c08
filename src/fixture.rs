//! The test fixture as one explicit context object.
//!
//! [`Fixture`] owns every component of a measurement cycle: the
//! excitation switch, the optional bus monitor, the channel orchestrator
//! and the optional feedback sinks. There is no ambient device state; the
//! service layer builds one fixture at start-up and calls
//! [`Fixture::run_cycle`] per request.

use std::sync::Arc;

use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use log::{error, info, warn};

use crate::config::FixtureConfig;
use crate::drivers::ads1115::{Ads1115, ChannelReader, StabilizedReader};
use crate::drivers::excitation::{AfterCycle, ExcitationSwitch};
use crate::drivers::feedback::{IndicatorStrip, PixelSink, StatusDisplay, TextSink};
use crate::drivers::impedance;
use crate::drivers::ina219::{BusMonitor, Ina219};
use crate::drivers::orchestrator::{ChannelPipeline, Orchestrator, Strategy};
use crate::drivers::bus::{self, SharedBus};
use crate::drivers::FixtureError;
use crate::types::{BusSample, MeasurementResult};

pub struct Fixture<P> {
    excitation: ExcitationSwitch<P>,
    after_cycle: AfterCycle,
    monitor: Option<Box<dyn BusMonitor>>,
    orchestrator: Orchestrator,
    nominal_voltage_v: f64,
    plausibility_floor_v: f64,
    strip: Option<IndicatorStrip>,
    display: Option<StatusDisplay>,
}

impl<P: OutputPin> Fixture<P> {
    /// Wires the ADC and bus monitor onto `bus` and takes the excitation
    /// gate. A bus monitor that does not answer is dropped with a warning;
    /// the cycle then runs on the nominal excitation voltage. The config is
    /// validated again here, so edits made after loading cannot slip past.
    pub fn new<I2C>(config: &FixtureConfig, bus: SharedBus<I2C>, gate: P) -> Result<Self, FixtureError>
    where
        I2C: I2c + Send + 'static,
    {
        config.validate()?;
        let adc = Ads1115::new(
            bus::device(bus),
            config.adc.address,
            config.adc.gain,
            config.adc.conversion_delay(),
        );
        let reader: Arc<dyn ChannelReader> = Arc::new(StabilizedReader::new(adc, config.adc.timing()));

        let monitor = config.bus_monitor.as_ref().and_then(|cfg| {
            let mut ina = Ina219::new(bus::device(bus), cfg.address, cfg.shunt_ohms, cfg.max_expected_amps);
            match ina.configure() {
                Ok(()) => Some(Box::new(ina) as Box<dyn BusMonitor>),
                Err(err) => {
                    warn!("bus monitor disabled: {err}");
                    None
                }
            }
        });

        let excitation = ExcitationSwitch::new(gate, config.excitation.polarity, config.excitation.settle())?;
        let bands = config.classification_bands()?;
        let pipeline = ChannelPipeline::new(reader, config.reference_table(), bands);
        let orchestrator = Orchestrator::new(pipeline, config.orchestration.strategy)
            .with_inter_channel_gap(config.orchestration.inter_channel_gap())
            .with_cycle_timeout(config.orchestration.cycle_timeout());

        Ok(Self {
            excitation,
            after_cycle: config.excitation.after_cycle,
            monitor,
            orchestrator,
            nominal_voltage_v: config.excitation.nominal_voltage_v,
            plausibility_floor_v: config.excitation.plausibility_floor_v,
            strip: None,
            display: None,
        })
    }

    /// Attaches the LED ring, if the config describes one.
    pub fn with_indicator_sink(mut self, config: &FixtureConfig, sink: Box<dyn PixelSink>) -> Self {
        match &config.indicators {
            Some(ind) => {
                let mut strip = IndicatorStrip::new(sink, ind.pixel_map(), ind.clear_first)
                    .with_brightness(ind.brightness);
                if let Err(err) = strip.clear() {
                    warn!("indicator ring: {err}");
                }
                self.strip = Some(strip);
            }
            None => warn!("indicator sink supplied but config has no indicators section"),
        }
        self
    }

    pub fn with_display_sink(mut self, sink: Box<dyn TextSink>) -> Self {
        self.display = Some(StatusDisplay::new(sink));
        self
    }

    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.orchestrator.set_strategy(strategy);
    }

    pub fn excitation_enabled(&self) -> bool {
        self.excitation.is_enabled()
    }

    /// One complete measurement. Always returns one reading per configured
    /// channel; hardware trouble shows up as NO_DEVICE / FAIL statuses.
    pub fn run_cycle(&mut self) -> MeasurementResult {
        if let Err(err) = self.excitation.enable() {
            error!("{err}; measuring without excitation");
        }

        let rail = self.sample_rail();
        let excitation_voltage = impedance::excitation_voltage(
            rail.map(|s| s.voltage_v),
            self.plausibility_floor_v,
            self.nominal_voltage_v,
        );
        let rail = rail.unwrap_or_default();

        let channels = self.orchestrator.run_cycle(excitation_voltage);
        let result = MeasurementResult {
            electrode_count: channels.len(),
            channels,
            bus_voltage_v: rail.voltage_v,
            bus_current_ma: rail.current_ma,
            excitation_voltage,
        };
        info!(
            "cycle: {} channels, rail {:.2} V / {:.1} mA, Vexc {:.2} V",
            result.electrode_count, result.bus_voltage_v, result.bus_current_ma, excitation_voltage
        );

        self.update_feedback(&result);

        if self.after_cycle == AfterCycle::SwitchOff {
            if let Err(err) = self.excitation.disable() {
                error!("{err}; excitation may still be on");
            }
        }
        result
    }

    fn sample_rail(&mut self) -> Option<BusSample> {
        let monitor = self.monitor.as_mut()?;
        match monitor.sample() {
            Ok(sample) => Some(sample),
            Err(err) => {
                warn!("bus monitor: {err}");
                None
            }
        }
    }

    fn update_feedback(&mut self, result: &MeasurementResult) {
        if let Some(strip) = self.strip.as_mut() {
            if let Err(err) = strip.update(&result.channels) {
                warn!("indicator ring: {err}");
            }
        }
        let excitation_on = self.excitation.is_enabled();
        if let Some(display) = self.display.as_mut() {
            if let Err(err) = display.render(result, excitation_on) {
                warn!("status display: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::ConfigError;
    use crate::drivers::excitation::Polarity;
    use crate::drivers::sim::{MemoryDisplay, MemoryRing, SimPin, SimulatedFixture};
    use crate::types::{ChannelStatus, Rgb, OPEN_CIRCUIT_OHMS};

    const REFS: [f64; 4] = [10_000.0; 4];

    fn config(polarity: &str, after_cycle: &str) -> FixtureConfig {
        FixtureConfig::from_json(&format!(
            r#"{{
                "channels": {{ "reference_resistances_ohms": [10000, 10000, 10000, 10000] }},
                "bands": {{
                    "short_floor_ohms": 100,
                    "good_max_ohms": 5000,
                    "acceptable_max_ohms": 20000,
                    "bad_max_ohms": 500000
                }},
                "excitation": {{
                    "polarity": "{polarity}",
                    "after_cycle": "{after_cycle}",
                    "settle_ms": 0
                }},
                "adc": {{ "mux_settle_ms": 0, "sample_interval_ms": 0, "conversion_ms": 0 }},
                "bus_monitor": {{}},
                "indicators": {{ "channel_pixels": [3, 6, 8, 11] }},
                "orchestration": {{ "inter_channel_ms": 0 }}
            }}"#
        ))
        .unwrap()
    }

    fn fixture(sim: &SimulatedFixture, config: &FixtureConfig) -> Fixture<SimPin> {
        Fixture::new(config, bus::share(sim.bus()), sim.pin()).unwrap()
    }

    #[test]
    fn scenario_a_midpoint_divider() {
        // 10 kΩ electrode on a 10 kΩ reference at 3.3 V reads 1.65 V
        let sim = SimulatedFixture::new(3.3, REFS.to_vec(), vec![10_000.0; 4]);
        let cfg = config("active_high", "switch_off");
        let result = fixture(&sim, &cfg).run_cycle();

        assert_eq!(result.electrode_count, 4);
        for reading in &result.channels {
            assert!((reading.raw_voltage - 1.65).abs() < 1e-3);
            assert!((reading.impedance_ohms - 10_000.0).abs() < 20.0);
            // good_max is 5 kΩ, so 10 kΩ is ACCEPTABLE
            assert_eq!(reading.status, ChannelStatus::Acceptable);
        }
        assert!((result.bus_voltage_v - 3.3).abs() < 0.004);
        assert!((result.excitation_voltage - result.bus_voltage_v).abs() < 1e-12);
    }

    #[test]
    fn scenario_a_good_when_threshold_allows() {
        let sim = SimulatedFixture::new(3.3, REFS.to_vec(), vec![10_000.0; 4]);
        let mut cfg = config("active_high", "switch_off");
        cfg.bands.good_max_ohms = 10_500.0;
        let result = fixture(&sim, &cfg).run_cycle();
        assert!(result.channels.iter().all(|r| r.status == ChannelStatus::Good));
    }

    #[test]
    fn scenario_b_open_lead_fails_blue() {
        let sim = SimulatedFixture::new(
            3.3,
            REFS.to_vec(),
            vec![4_700.0, f64::INFINITY, 22_000.0, 1.0e6],
        );
        let result = fixture(&sim, &config("active_high", "switch_off")).run_cycle();
        let open = &result.channels[1];
        assert_eq!(open.raw_voltage, 0.0);
        assert_eq!(open.impedance_ohms, OPEN_CIRCUIT_OHMS);
        assert_eq!(open.status, ChannelStatus::Fail);
        assert_eq!(open.indicator_color, Rgb::BLUE);

        assert_eq!(result.channels[0].status, ChannelStatus::Good);
        assert_eq!(result.channels[2].status, ChannelStatus::Bad);
        assert_eq!(result.channels[3].status, ChannelStatus::Fail);
    }

    #[test]
    fn scenario_c_transport_fault_on_one_channel() {
        let sim = SimulatedFixture::new(3.3, REFS.to_vec(), vec![4_700.0; 4]).with_fault(2);
        let result = fixture(&sim, &config("active_high", "switch_off")).run_cycle();
        assert_eq!(result.channels.len(), 4);
        assert_eq!(result.channels[2].status, ChannelStatus::NoDevice);
        for i in [0, 1, 3] {
            assert_eq!(result.channels[i].status, ChannelStatus::Good);
            assert!((result.channels[i].impedance_ohms - 4_700.0).abs() < 20.0);
        }
    }

    #[test]
    fn missing_adc_yields_complete_no_device_result() {
        let sim = SimulatedFixture::new(3.3, REFS.to_vec(), vec![4_700.0; 4]).without_adc();
        let result = fixture(&sim, &config("active_high", "switch_off")).run_cycle();
        assert_eq!(result.channels.len(), 4);
        assert_eq!(result.count_with(ChannelStatus::NoDevice), 4);
    }

    #[test]
    fn polarity_is_honoured_both_ways() {
        for (gate, name) in [(Polarity::ActiveHigh, "active_high"), (Polarity::ActiveLow, "active_low")] {
            let sim = SimulatedFixture::new(3.3, REFS.to_vec(), vec![4_700.0; 4]).with_gate(gate);
            let mut fx = fixture(&sim, &config(name, "leave_on"));
            assert!(!sim.powered(), "{name}: off at rest");
            let result = fx.run_cycle();
            assert!(sim.powered(), "{name}: left on");
            assert!(fx.excitation_enabled());
            assert_eq!(result.count_with(ChannelStatus::Good), 4, "{name}");
        }
    }

    #[test]
    fn wrong_polarity_reads_open_circuits() {
        let sim = SimulatedFixture::new(3.3, REFS.to_vec(), vec![4_700.0; 4])
            .with_gate(Polarity::ActiveLow);
        let result = fixture(&sim, &config("active_high", "switch_off")).run_cycle();
        assert_eq!(result.count_with(ChannelStatus::Fail), 4);
        // rail collapsed, nominal voltage stood in
        assert_eq!(result.excitation_voltage, 3.3);
    }

    #[test]
    fn switch_off_policy_powers_down() {
        let sim = SimulatedFixture::new(3.3, REFS.to_vec(), vec![4_700.0; 4]);
        let mut fx = fixture(&sim, &config("active_high", "switch_off"));
        fx.run_cycle();
        assert!(!sim.powered());
        assert!(!fx.excitation_enabled());
    }

    #[test]
    fn missing_monitor_uses_nominal_voltage() {
        let sim = SimulatedFixture::new(3.0, REFS.to_vec(), vec![10_000.0; 4]).without_bus_monitor();
        let result = fixture(&sim, &config("active_high", "switch_off")).run_cycle();
        assert_eq!(result.bus_voltage_v, 0.0);
        assert_eq!(result.bus_current_ma, 0.0);
        assert_eq!(result.excitation_voltage, 3.3);
        // divider really ran at 3.0 V: 1.5 V solved against 3.3 V
        let expected = impedance::compute(1.5, 10_000.0, 3.3);
        assert!((result.channels[0].impedance_ohms - expected).abs() < 20.0);
    }

    #[test]
    fn sinks_receive_results_and_failures_are_swallowed() {
        let sim = SimulatedFixture::new(3.3, REFS.to_vec(), vec![4_700.0, 10_000.0, f64::INFINITY, 100_000.0]);
        let cfg = config("active_high", "switch_off");
        let ring = MemoryRing::new(12);
        let panel = MemoryDisplay::new();
        let mut fx = fixture(&sim, &cfg)
            .with_indicator_sink(&cfg, Box::new(ring.clone()))
            .with_display_sink(Box::new(panel.clone()));
        fx.run_cycle();
        let pixels = ring.pixels();
        // default ring brightness is 50/255
        assert_eq!(pixels[3], Rgb::GREEN.scaled(50));
        assert_eq!(pixels[6], Rgb::AMBER.scaled(50));
        assert_eq!(pixels[8], Rgb::BLUE.scaled(50));
        assert_eq!(pixels[11], Rgb::RED.scaled(50));
        let lines = panel.lines();
        assert_eq!(lines[0], "EXC: ON");
        assert!(lines[2].starts_with("Z2:open Z3:"), "{}", lines[2]);

        let mut broken = fixture(&sim, &cfg)
            .with_indicator_sink(&cfg, Box::new(MemoryRing::failing(12)))
            .with_display_sink(Box::new(MemoryDisplay::failing()));
        let result = broken.run_cycle();
        assert_eq!(result.channels.len(), 4);
        assert_eq!(result.channels[0].status, ChannelStatus::Good);
    }

    #[test]
    fn config_edited_after_load_is_rejected_as_config_error() {
        let sim = SimulatedFixture::new(3.3, REFS.to_vec(), vec![4_700.0; 4]);
        let mut cfg = config("active_high", "switch_off");
        cfg.bands.good_max_ohms = 50_000.0;
        let err = Fixture::new(&cfg, bus::share(sim.bus()), sim.pin()).err();
        assert!(matches!(err, Some(FixtureError::Config(ConfigError::Invalid(_)))));
    }

    #[test]
    fn concurrent_cycle_reports_in_channel_order_under_bus_delays() {
        let sim = SimulatedFixture::new(3.3, REFS.to_vec(), vec![1_000.0, 8_000.0, 50_000.0, 2.0e6])
            .with_channel_delay(0, Duration::from_millis(30))
            .with_channel_delay(1, Duration::from_millis(20))
            .with_channel_delay(2, Duration::from_millis(10));
        let result = fixture(&sim, &config("active_high", "switch_off")).run_cycle();
        let indices: Vec<usize> = result.channels.iter().map(|r| r.channel_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        let statuses: Vec<ChannelStatus> = result.channels.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                ChannelStatus::Good,
                ChannelStatus::Acceptable,
                ChannelStatus::Bad,
                ChannelStatus::Fail
            ]
        );
    }

    #[test]
    fn electrode_unplugged_between_cycles() {
        let sim = SimulatedFixture::new(3.3, REFS.to_vec(), vec![4_700.0; 4]);
        let mut fx = fixture(&sim, &config("active_high", "switch_off"));
        assert_eq!(fx.run_cycle().count_with(ChannelStatus::Good), 4);
        sim.set_electrode(1, f64::INFINITY);
        let result = fx.run_cycle();
        assert_eq!(result.channels[1].status, ChannelStatus::Fail);
        assert!(result.channels[1].is_open_circuit());
        assert_eq!(result.count_with(ChannelStatus::Good), 3);
    }

    #[test]
    fn sequential_and_concurrent_agree() {
        let sim = SimulatedFixture::new(3.3, REFS.to_vec(), vec![1_000.0, 8_000.0, 50_000.0, 2.0e6]);
        let cfg = config("active_high", "switch_off");
        let mut fx = fixture(&sim, &cfg);
        let concurrent = fx.run_cycle();
        fx.set_strategy(Strategy::Sequential);
        let sequential = fx.run_cycle();
        assert_eq!(concurrent, sequential);
    }
}
