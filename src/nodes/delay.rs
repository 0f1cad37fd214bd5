use std::sync::Arc;

use crate::node::{Node, ProcessContext};
use crate::node_manager::{Clock, NodeManager};
use crate::ramped_value::{RampHandle, RampMode, RampedValue};
use crate::Sample;

/// A feedback delay with a ramped, linearly interpolated delay time.
///
/// *inputs*
/// 0. "audio"
/// *outputs*
/// 0. "audio": the dry and delayed signal mixed according to `dry_wet`
#[derive(Debug)]
pub struct DelayNode {
    buffer: Vec<Sample>,
    write_position: usize,
    max_delay_ms: Sample,
    sample_rate: Sample,
    time_ms: RampedValue<Sample>,
    feedback: RampedValue<Sample>,
    dry_wet: RampedValue<Sample>,
    clock: Arc<Clock>,
}

impl DelayNode {
    /// The delay line is allocated when the node is made safe and again on
    /// every sample rate change.
    pub fn new(node_manager: &NodeManager, max_delay_ms: Sample, time_ms: Sample) -> Self {
        Self {
            buffer: Vec::new(),
            write_position: 0,
            max_delay_ms,
            sample_rate: 0.0,
            time_ms: RampedValue::new(time_ms.min(max_delay_ms)),
            feedback: RampedValue::new(0.0),
            dry_wet: RampedValue::new(1.0),
            clock: node_manager.clock(),
        }
    }

    #[inline]
    fn read(&self, delay_samples: Sample) -> Sample {
        let len = self.buffer.len();
        let whole = delay_samples.floor();
        let fraction = delay_samples - whole;
        let whole = whole as usize;
        let a = self.buffer[(self.write_position + len - whole) % len];
        let b = self.buffer[(self.write_position + len - whole - 1) % len];
        a + (b - a) * fraction
    }
}

/// Controls of a [`DelayNode`]. Times are in milliseconds.
#[derive(Debug, Clone)]
pub struct DelayHandle {
    time_ms: RampHandle<Sample>,
    feedback: RampHandle<Sample>,
    dry_wet: RampHandle<Sample>,
    max_delay_ms: Sample,
    clock: Arc<Clock>,
}

impl DelayHandle {
    /// Clamped to the maximum delay time.
    pub fn set_time(&self, time_ms: Sample, ramp_ms: Sample) {
        self.time_ms.ramp(
            time_ms.clamp(0.0, self.max_delay_ms),
            self.clock.ms_to_samples(ramp_ms),
            RampMode::Linear,
        );
    }
    #[allow(missing_docs)]
    pub fn set_feedback(&self, feedback: Sample, ramp_ms: Sample) {
        self.feedback
            .ramp(feedback, self.clock.ms_to_samples(ramp_ms), RampMode::Linear);
    }
    /// 0 is only the dry signal, 1 only the delayed signal.
    pub fn set_dry_wet(&self, dry_wet: Sample, ramp_ms: Sample) {
        self.dry_wet.ramp(
            dry_wet.clamp(0.0, 1.0),
            self.clock.ms_to_samples(ramp_ms),
            RampMode::Linear,
        );
    }
    #[allow(missing_docs)]
    pub fn time(&self) -> Sample {
        self.time_ms.value()
    }
    #[allow(missing_docs)]
    pub fn max_delay_time(&self) -> Sample {
        self.max_delay_ms
    }
}

impl Node for DelayNode {
    type Controls = DelayHandle;

    fn controls(&self) -> Self::Controls {
        DelayHandle {
            time_ms: self.time_ms.handle(),
            feedback: self.feedback.handle(),
            dry_wet: self.dry_wet.handle(),
            max_delay_ms: self.max_delay_ms,
            clock: self.clock.clone(),
        }
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let input = ctx.input(0);
        let samples_per_ms = self.sample_rate / 1000.0;
        let output = ctx.output(0);
        if self.buffer.len() < 3 {
            output.fill(0.0);
            return;
        }
        let max_delay = (self.buffer.len() - 2) as Sample;
        for (i, out) in output.iter_mut().enumerate() {
            let dry = input.map_or(0.0, |input| input[i]);
            let delay_samples = (self.time_ms.next_value() * samples_per_ms).clamp(1.0, max_delay);
            let feedback = self.feedback.next_value();
            let wet = self.dry_wet.next_value();
            let delayed = self.read(delay_samples);
            *out = dry * (1.0 - wet) + delayed * wet;
            self.buffer[self.write_position] = dry + delayed * feedback;
            self.write_position = (self.write_position + 1) % self.buffer.len();
        }
    }
    fn num_inputs(&self) -> usize {
        1
    }
    fn num_outputs(&self) -> usize {
        1
    }
    fn name(&self) -> &'static str {
        "DelayNode"
    }
    /// *Allocates memory*
    fn sample_rate_changed(&mut self, sample_rate: Sample) {
        self.sample_rate = sample_rate;
        let len = (self.max_delay_ms * sample_rate / 1000.0).ceil() as usize + 3;
        self.buffer.clear();
        self.buffer.resize(len, 0.0);
        self.write_position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_utils::{listen, node_manager, render};
    use crate::nodes::ControlNode;

    #[test]
    fn constant_input_through_feedback_delay() {
        let nm = node_manager(4);
        let source = nm.make_safe(ControlNode::new(&nm, 1.0));
        // 3 samples at 1000 Hz
        let delay = nm.make_safe(DelayNode::new(&nm, 10.0, 3.0));
        nm.connect(source.output(0), delay.input(0)).unwrap();
        let _out = listen(&nm, &delay, 0);
        delay.set_feedback(0.5, 0.0);
        let output = [render(&nm, 0), render(&nm, 0)].concat();
        assert_eq!(output, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.5, 1.5]);

        delay.set_dry_wet(0.0, 0.0);
        assert_eq!(render(&nm, 0), vec![1.0; 4]);
    }

    #[test]
    fn delay_time_is_clamped() {
        let nm = node_manager(4);
        let delay = nm.make_safe(DelayNode::new(&nm, 10.0, 50.0));
        let _out = listen(&nm, &delay, 0);
        assert_eq!(delay.max_delay_time(), 10.0);
        assert_eq!(delay.time(), 10.0);
        delay.set_time(4.0, 0.0);
        nm.process_period();
        assert_eq!(delay.time(), 4.0);
        delay.set_time(20.0, 0.0);
        nm.process_period();
        assert_eq!(delay.time(), 10.0);
    }
}
