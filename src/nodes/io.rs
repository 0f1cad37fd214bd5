use crate::node::{Node, ProcessContext};

/// Adds its input into one channel of the device output. Register it as a
/// root process to have it pulled.
#[derive(Debug, Clone)]
pub struct OutputNode {
    channel: usize,
}

impl OutputNode {
    #[allow(missing_docs)]
    pub fn new(channel: usize) -> Self {
        Self { channel }
    }
    #[allow(missing_docs)]
    pub fn channel(&self) -> usize {
        self.channel
    }
    /// Takes effect from the next period.
    pub fn set_channel(&mut self, channel: usize) {
        self.channel = channel;
    }
}

impl Node for OutputNode {
    type Controls = ();

    fn controls(&self) -> Self::Controls {}
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let Some(input) = ctx.input(0) else {
            return;
        };
        // Channels the device doesn't have are ignored
        if let Some(output) = ctx.device_output(self.channel) {
            for (out, sample) in output.iter_mut().zip(input) {
                *out += *sample;
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
        "in"
    }
    fn name(&self) -> &'static str {
        "OutputNode"
    }
}

/// Outputs one channel of the device input.
#[derive(Debug, Clone)]
pub struct InputNode {
    channel: usize,
}

impl InputNode {
    #[allow(missing_docs)]
    pub fn new(channel: usize) -> Self {
        Self { channel }
    }
    #[allow(missing_docs)]
    pub fn channel(&self) -> usize {
        self.channel
    }
}

impl Node for InputNode {
    type Controls = ();

    fn controls(&self) -> Self::Controls {}
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        match ctx.device_input(self.channel) {
            Some(input) => ctx.output(0).copy_from_slice(input),
            None => ctx.clear_outputs(),
        }
    }
    fn num_inputs(&self) -> usize {
        0
    }
    fn num_outputs(&self) -> usize {
        1
    }
    fn output_desc(&self, _output: usize) -> &'static str {
        "out"
    }
    fn name(&self) -> &'static str {
        "InputNode"
    }
}
