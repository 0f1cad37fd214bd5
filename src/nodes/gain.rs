use std::sync::Arc;

use crate::node::{Node, ProcessContext};
use crate::node_manager::{Clock, NodeManager};
use crate::ramped_value::{RampHandle, RampMode, RampedValue};
use crate::Sample;

/// Multiplies its audio input by a ramped gain and, if connected, by a
/// modulation input.
///
/// *inputs*
/// 0. "audio"
/// 1. "modulation": multiplied with the audio, ignored when unconnected
/// *outputs*
/// 0. "audio"
#[derive(Debug)]
pub struct GainNode {
    gain: RampedValue<Sample>,
    clock: Arc<Clock>,
}

impl GainNode {
    #[allow(missing_docs)]
    pub fn new(node_manager: &NodeManager, gain: Sample) -> Self {
        Self {
            gain: RampedValue::new(gain),
            clock: node_manager.clock(),
        }
    }
}

/// Controls of a [`GainNode`].
#[derive(Debug, Clone)]
pub struct GainHandle {
    gain: RampHandle<Sample>,
    clock: Arc<Clock>,
}

impl GainHandle {
    /// Ramp to `gain` over `time_ms` milliseconds. A time of 0 changes the
    /// gain at the start of the next period.
    pub fn set_gain(&self, gain: Sample, time_ms: Sample, mode: RampMode) {
        self.gain.ramp(gain, self.clock.ms_to_samples(time_ms), mode);
    }
    #[allow(missing_docs)]
    pub fn gain(&self) -> Sample {
        self.gain.value()
    }
    /// Hold the gain where it is.
    pub fn stop(&self) {
        self.gain.stop();
    }
}

impl Node for GainNode {
    type Controls = GainHandle;

    fn controls(&self) -> Self::Controls {
        GainHandle {
            gain: self.gain.handle(),
            clock: self.clock.clone(),
        }
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let input = ctx.input(0);
        let modulation = ctx.input(1);
        let output = ctx.output(0);
        let Some(input) = input else {
            // Keep ramps on schedule even without input
            for out in output.iter_mut() {
                self.gain.next_value();
                *out = 0.0;
            }
            return;
        };
        match modulation {
            Some(modulation) => {
                for ((out, sample), m) in output.iter_mut().zip(input).zip(modulation) {
                    *out = *sample * self.gain.next_value() * *m;
                }
            }
            None => {
                for (out, sample) in output.iter_mut().zip(input) {
                    *out = *sample * self.gain.next_value();
                }
            }
        }
    }
    fn num_inputs(&self) -> usize {
        2
    }
    fn num_outputs(&self) -> usize {
        1
    }
    fn input_desc(&self, input: usize) -> &'static str {
        match input {
            0 => "audio",
            1 => "modulation",
            _ => "",
        }
    }
    fn output_desc(&self, _output: usize) -> &'static str {
        "audio"
    }
    fn name(&self) -> &'static str {
        "GainNode"
    }
}
