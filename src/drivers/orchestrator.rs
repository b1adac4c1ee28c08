//! Per-channel read → solve → classify, across every configured channel.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::Deserialize;

use crate::drivers::ads1115::ChannelReader;
use crate::drivers::classify::ClassificationBands;
use crate::drivers::impedance::{self, ReferenceTable};
use crate::drivers::FixtureError;
use crate::types::ChannelReading;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One channel after another, with a gap between channels.
    Sequential,
    /// One worker thread per channel; results are slotted back by index.
    #[default]
    Concurrent,
}

/// The work done for a single channel.
pub struct ChannelPipeline {
    reader: Arc<dyn ChannelReader>,
    references: ReferenceTable,
    bands: ClassificationBands,
}

impl ChannelPipeline {
    pub fn new(
        reader: Arc<dyn ChannelReader>,
        references: ReferenceTable,
        bands: ClassificationBands,
    ) -> Self {
        Self {
            reader,
            references,
            bands,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.references.len()
    }

    /// Never fails: a read error degrades to a NO_DEVICE reading.
    pub fn measure(&self, channel: usize, excitation_v: f64) -> ChannelReading {
        let Some(reference_ohms) = self.references.get(channel) else {
            warn!("ch{channel}: no reference resistance configured");
            return ChannelReading::no_device(channel);
        };
        let raw_voltage = match self.reader.read_channel(channel) {
            Ok(v) => v,
            Err(err) => {
                warn!("ch{channel}: {err}; reporting NO_DEVICE");
                return ChannelReading::no_device(channel);
            }
        };
        let impedance_ohms = impedance::compute(raw_voltage, reference_ohms, excitation_v);
        let (status, indicator_color) = self.bands.classify(impedance_ohms);
        debug!("ch{channel}: V={raw_voltage:.6}V | Z={impedance_ohms:.1} Ohm | {status}");
        ChannelReading {
            channel_index: channel,
            raw_voltage,
            impedance_ohms,
            status,
            indicator_color,
        }
    }
}

pub struct Orchestrator {
    pipeline: Arc<ChannelPipeline>,
    strategy: Strategy,
    inter_channel_gap: Duration,
    cycle_timeout: Duration,
    /// Last worker started per channel. At most one per channel is ever
    /// alive, including workers left behind by a timed-out cycle.
    workers: Vec<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(pipeline: ChannelPipeline, strategy: Strategy) -> Self {
        let workers = (0..pipeline.channel_count()).map(|_| None).collect();
        Self {
            pipeline: Arc::new(pipeline),
            strategy,
            inter_channel_gap: Duration::from_millis(10),
            cycle_timeout: Duration::from_secs(10),
            workers,
        }
    }

    pub fn with_inter_channel_gap(mut self, gap: Duration) -> Self {
        self.inter_channel_gap = gap;
        self
    }

    pub fn with_cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = timeout;
        self
    }

    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.strategy = strategy;
    }

    pub fn channel_count(&self) -> usize {
        self.pipeline.channel_count()
    }

    /// Measures every configured channel. The output always holds one
    /// reading per channel, in channel order.
    pub fn run_cycle(&mut self, excitation_v: f64) -> Vec<ChannelReading> {
        match self.strategy {
            Strategy::Sequential => self.run_sequential(excitation_v),
            Strategy::Concurrent => self.run_concurrent(excitation_v),
        }
    }

    fn run_sequential(&self, excitation_v: f64) -> Vec<ChannelReading> {
        let deadline = Instant::now() + self.cycle_timeout;
        let mut readings = Vec::with_capacity(self.channel_count());
        for channel in 0..self.channel_count() {
            if Instant::now() >= deadline {
                warn!(
                    "ch{channel}: {}; reporting NO_DEVICE",
                    FixtureError::CycleTimeout(self.cycle_timeout)
                );
                readings.push(ChannelReading::no_device(channel));
                continue;
            }
            if self.worker_in_flight(channel) {
                warn!("ch{channel}: previous read still in flight; reporting NO_DEVICE");
                readings.push(ChannelReading::no_device(channel));
                continue;
            }
            if channel > 0 {
                thread::sleep(self.inter_channel_gap);
            }
            readings.push(self.pipeline.measure(channel, excitation_v));
        }
        readings
    }

    fn worker_in_flight(&self, channel: usize) -> bool {
        self.workers
            .get(channel)
            .and_then(Option::as_ref)
            .is_some_and(|handle| !handle.is_finished())
    }

    fn run_concurrent(&mut self, excitation_v: f64) -> Vec<ChannelReading> {
        let count = self.channel_count();
        let deadline = Instant::now() + self.cycle_timeout;
        let (tx, rx) = mpsc::channel::<ChannelReading>();
        let mut slots: Vec<Option<ChannelReading>> = vec![None; count];

        for (channel, worker) in self.workers.iter_mut().enumerate() {
            if let Some(handle) = worker.take() {
                if !handle.is_finished() {
                    warn!("ch{channel}: previous read still in flight; reporting NO_DEVICE");
                    *worker = Some(handle);
                    slots[channel] = Some(ChannelReading::no_device(channel));
                    continue;
                }
                if handle.join().is_err() {
                    warn!("ch{channel}: previous worker panicked");
                }
            }
            let pipeline = Arc::clone(&self.pipeline);
            let tx = tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("channel-{channel}"))
                .spawn(move || {
                    // receiver gone means the cycle already timed out
                    tx.send(pipeline.measure(channel, excitation_v)).ok();
                });
            match spawned {
                Ok(handle) => *worker = Some(handle),
                Err(err) => {
                    warn!("ch{channel}: could not start worker: {err}");
                    slots[channel] = Some(ChannelReading::no_device(channel));
                }
            }
        }
        drop(tx);

        let mut pending = slots.iter().filter(|s| s.is_none()).count();
        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(reading) => {
                    let index = reading.channel_index;
                    if let Some(slot) = slots.get_mut(index).filter(|s| s.is_none()) {
                        *slot = Some(reading);
                        pending -= 1;
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!("{}", FixtureError::CycleTimeout(self.cycle_timeout));
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(channel, slot)| {
                slot.unwrap_or_else(|| {
                    warn!("ch{channel}: no result before deadline; reporting NO_DEVICE");
                    ChannelReading::no_device(channel)
                })
            })
            .collect()
    }
}
