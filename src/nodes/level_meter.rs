use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use crate::dirty_flag::DirtyFlag;
use crate::node::{Node, ProcessContext};
use crate::Sample;

/// How a [`LevelMeterNode`] summarises a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub enum MeterType {
    /// Root mean square
    #[default]
    Rms,
    /// Largest absolute sample value
    Peak,
}

impl MeterType {
    fn to_u8(self) -> u8 {
        match self {
            MeterType::Rms => 0,
            MeterType::Peak => 1,
        }
    }
    fn from_u8(v: u8) -> Self {
        match v {
            1 => MeterType::Peak,
            _ => MeterType::Rms,
        }
    }
}

#[derive(Debug)]
struct MeterShared {
    level: AtomicU32,
    level_updated: DirtyFlag,
    meter_type: AtomicU8,
    window_ms: AtomicU32,
    settings_changed: DirtyFlag,
}

/// Measures the level of its input over consecutive analysis windows. Has no
/// outputs, so it needs to be registered as a root process.
#[derive(Debug)]
pub struct LevelMeterNode {
    shared: Arc<MeterShared>,
    meter_type: MeterType,
    window_samples: usize,
    sample_rate: Sample,
    accumulator: f64,
    counter: usize,
}

impl LevelMeterNode {
    #[allow(missing_docs)]
    pub fn new(meter_type: MeterType, window_ms: Sample) -> Self {
        Self {
            shared: Arc::new(MeterShared {
                level: AtomicU32::new(0.0_f32.to_bits()),
                level_updated: DirtyFlag::new(),
                meter_type: AtomicU8::new(meter_type.to_u8()),
                window_ms: AtomicU32::new(window_ms.to_bits()),
                settings_changed: DirtyFlag::new(),
            }),
            meter_type,
            window_samples: 1,
            sample_rate: 0.0,
            accumulator: 0.0,
            counter: 0,
        }
    }

    fn apply_settings(&mut self) {
        self.meter_type = MeterType::from_u8(self.shared.meter_type.load(Ordering::Relaxed));
        let window_ms = Sample::from_bits(self.shared.window_ms.load(Ordering::Relaxed));
        self.window_samples = ((window_ms * self.sample_rate / 1000.0).round() as usize).max(1);
        self.accumulator = 0.0;
        self.counter = 0;
    }

    fn publish(&mut self) {
        let level = match self.meter_type {
            MeterType::Rms => (self.accumulator / self.counter as f64).sqrt(),
            MeterType::Peak => self.accumulator,
        } as Sample;
        self.shared.level.store(level.to_bits(), Ordering::Relaxed);
        self.shared.level_updated.set();
        self.accumulator = 0.0;
        self.counter = 0;
    }
}

/// Controls of a [`LevelMeterNode`].
#[derive(Debug, Clone)]
pub struct LevelMeterHandle {
    shared: Arc<MeterShared>,
}

impl LevelMeterHandle {
    /// The level of the most recently completed window.
    pub fn get_level(&self) -> Sample {
        Sample::from_bits(self.shared.level.load(Ordering::Relaxed))
    }
    /// True once after each completed window.
    pub fn has_new_level(&self) -> bool {
        self.shared.level_updated.check()
    }
    /// Restarts the current window.
    pub fn set_meter_type(&self, meter_type: MeterType) {
        self.shared
            .meter_type
            .store(meter_type.to_u8(), Ordering::Relaxed);
        self.shared.settings_changed.set();
    }
    /// Restarts the current window.
    pub fn set_analysis_window(&self, window_ms: Sample) {
        self.shared
            .window_ms
            .store(window_ms.to_bits(), Ordering::Relaxed);
        self.shared.settings_changed.set();
    }
}

impl Node for LevelMeterNode {
    type Controls = LevelMeterHandle;

    fn controls(&self) -> Self::Controls {
        LevelMeterHandle {
            shared: self.shared.clone(),
        }
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        if self.shared.settings_changed.check() {
            self.apply_settings();
        }
        let Some(input) = ctx.input(0) else {
            return;
        };
        for sample in input {
            let sample = *sample as f64;
            match self.meter_type {
                MeterType::Rms => self.accumulator += sample * sample,
                MeterType::Peak => self.accumulator = self.accumulator.max(sample.abs()),
            }
            self.counter += 1;
            if self.counter >= self.window_samples {
                self.publish();
            }
        }
    }
    fn num_inputs(&self) -> usize {
        1
    }
    fn num_outputs(&self) -> usize {
        0
    }
    fn input_desc(&self, _input: usize) -> &'static str {
        "audio"
    }
    fn name(&self) -> &'static str {
        "LevelMeterNode"
    }
    fn sample_rate_changed(&mut self, sample_rate: Sample) {
        self.sample_rate = sample_rate;
        self.apply_settings();
    }
}
