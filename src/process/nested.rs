use super::{Process, ProcessError};
use crate::node_manager::{NodeManager, NodeManagerSettings};
use crate::Sample;

/// A child process that runs a graph of its own. The device outputs of the
/// inner graph are the output of the process.
///
/// Build the inner graph through [`NestedGraph::node_manager`], before or
/// after the process has been added to a parent. The inner graph is locked
/// for the duration of each period like any other graph.
#[derive(Debug, Clone)]
pub struct NestedGraph {
    node_manager: NodeManager,
    channel_count: usize,
}

impl NestedGraph {
    /// Uses the sample rate and buffer size of `parent`.
    pub fn new(parent: &NodeManager, channel_count: usize) -> Self {
        Self {
            node_manager: NodeManager::new(NodeManagerSettings {
                sample_rate: parent.sample_rate(),
                internal_buffer_size: parent.internal_buffer_size(),
                input_channel_count: 0,
                output_channel_count: channel_count,
                ..Default::default()
            }),
            channel_count,
        }
    }
    /// A handle to the inner graph.
    pub fn node_manager(&self) -> NodeManager {
        self.node_manager.clone()
    }
}

impl Process for NestedGraph {
    fn channel_count(&self) -> usize {
        self.channel_count
    }
    fn process(&mut self, outputs: &mut [Vec<Sample>]) -> Result<(), ProcessError> {
        self.node_manager.render(outputs);
        Ok(())
    }
    fn name(&self) -> &'static str {
        "NestedGraph"
    }
    fn sample_rate_changed(&mut self, sample_rate: Sample) {
        if self.node_manager.sample_rate() != sample_rate {
            self.node_manager.set_sample_rate(sample_rate);
        }
    }
    fn buffer_size_changed(&mut self, buffer_size: usize) {
        if self.node_manager.internal_buffer_size() != buffer_size {
            self.node_manager.set_internal_buffer_size(buffer_size);
        }
    }
}
