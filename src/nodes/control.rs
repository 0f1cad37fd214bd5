use std::sync::Arc;

use crate::node::{Node, NodeEventKind, ProcessContext};
use crate::node_manager::{Clock, NodeManager};
use crate::ramped_value::{RampHandle, RampMode, RampedValue};
use crate::Sample;

/// Outputs a control value, ramped when it changes. Emits
/// [`NodeEventKind::RampFinished`] in every period in which the value
/// reaches its destination.
#[derive(Debug)]
pub struct ControlNode {
    value: RampedValue<Sample>,
    clock: Arc<Clock>,
}

impl ControlNode {
    #[allow(missing_docs)]
    pub fn new(node_manager: &NodeManager, value: Sample) -> Self {
        Self {
            value: RampedValue::new(value),
            clock: node_manager.clock(),
        }
    }
}

/// Controls of a [`ControlNode`].
#[derive(Debug, Clone)]
pub struct ControlHandle {
    ramp: RampHandle<Sample>,
    clock: Arc<Clock>,
}

impl ControlHandle {
    /// Jump to `value` at the start of the next period.
    pub fn set_value(&self, value: Sample) {
        self.ramp.set(value);
    }
    /// Ramp to `destination` over `time_ms` milliseconds.
    pub fn ramp(&self, destination: Sample, time_ms: Sample, mode: RampMode) {
        self.ramp
            .ramp(destination, self.clock.ms_to_samples(time_ms), mode);
    }
    /// Ramp to `destination` over a number of samples.
    pub fn ramp_samples(&self, destination: Sample, steps: u64, mode: RampMode) {
        self.ramp.ramp(destination, steps, mode);
    }
    /// Hold the current value.
    pub fn stop(&self) {
        self.ramp.stop();
    }
    /// The value most recently output.
    pub fn value(&self) -> Sample {
        self.ramp.value()
    }
    /// True once per time the destination was reached since the last call.
    pub fn destination_reached(&self) -> bool {
        self.ramp.destination_reached()
    }
}

impl Node for ControlNode {
    type Controls = ControlHandle;

    fn controls(&self) -> Self::Controls {
        ControlHandle {
            ramp: self.value.handle(),
            clock: self.clock.clone(),
        }
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        for out in ctx.output(0) {
            *out = self.value.next_value();
        }
        if self.value.take_destination_reached() {
            ctx.emit(NodeEventKind::RampFinished);
        }
    }
    fn num_inputs(&self) -> usize {
        0
    }
    fn num_outputs(&self) -> usize {
        1
    }
    fn output_desc(&self, _output: usize) -> &'static str {
        "value"
    }
    fn name(&self) -> &'static str {
        "ControlNode"
    }
}
