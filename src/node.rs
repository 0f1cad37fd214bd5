//! A [`Node`] is the smallest unit of DSP in the graph. Implement [`Node`] and
//! hand it to [`NodeManager::make_safe`](crate::node_manager::NodeManager::make_safe)
//! to get it into the graph.
//!
//! A node is processed at most once per audio period, and only after every
//! node it is connected to has been processed for that period. It reads its
//! inputs and writes its outputs through the [`ProcessContext`].
//!
//! The parts of a node that need to be reachable from control threads (ramp
//! handles, meter readings, trigger flags) go in its [`Node::Controls`], which
//! is cloned into the [`SafeOwner`](crate::node_manager::SafeOwner) when the
//! node is made safe.

use downcast_rs::{impl_downcast, Downcast};
use slotmap::SlotMap;

use crate::node_manager::{NodeKey, NodeSlot};
use crate::Sample;

/// Implement this to be a node in the graph.
pub trait Node: Send + 'static {
    /// Everything a control thread may touch while the node is live. Must
    /// only contain lock-free or otherwise audio thread safe state.
    type Controls: Clone + Send + Sync + 'static;
    /// Called once when the node is made safe.
    fn controls(&self) -> Self::Controls;
    /// Produce one period of output. Unconnected inputs read as `None` and
    /// must be treated as silence.
    fn process(&mut self, ctx: &mut ProcessContext<'_>);
    /// The number of input pins. Must not change after the node was made safe.
    fn num_inputs(&self) -> usize;
    /// The number of output pins. Must not change after the node was made safe.
    fn num_outputs(&self) -> usize;
    /// Return a label for a given input pin index.
    #[allow(unused)]
    fn input_desc(&self, input: usize) -> &'static str {
        ""
    }
    /// Return a label for a given output pin index.
    #[allow(unused)]
    fn output_desc(&self, output: usize) -> &'static str {
        ""
    }
    /// A name identifying this kind of node.
    fn name(&self) -> &'static str {
        "no_name"
    }
    /// Called with the processing lock held. May allocate.
    #[allow(unused)]
    fn sample_rate_changed(&mut self, sample_rate: Sample) {}
    /// Called with the processing lock held. May allocate.
    #[allow(unused)]
    fn buffer_size_changed(&mut self, buffer_size: usize) {}
}

/// The object safe face of a [`Node`] stored in the graph.
#[doc(hidden)]
pub trait DynNode: Downcast + Send {
    fn process(&mut self, ctx: &mut ProcessContext<'_>);
    fn num_inputs(&self) -> usize;
    fn num_outputs(&self) -> usize;
    fn input_desc(&self, input: usize) -> &'static str;
    fn output_desc(&self, output: usize) -> &'static str;
    fn name(&self) -> &'static str;
    fn sample_rate_changed(&mut self, sample_rate: Sample);
    fn buffer_size_changed(&mut self, buffer_size: usize);
}
impl_downcast!(DynNode);

impl<T: Node> DynNode for T {
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        Node::process(self, ctx);
    }
    fn num_inputs(&self) -> usize {
        Node::num_inputs(self)
    }
    fn num_outputs(&self) -> usize {
        Node::num_outputs(self)
    }
    fn input_desc(&self, input: usize) -> &'static str {
        Node::input_desc(self, input)
    }
    fn output_desc(&self, output: usize) -> &'static str {
        Node::output_desc(self, output)
    }
    fn name(&self) -> &'static str {
        Node::name(self)
    }
    fn sample_rate_changed(&mut self, sample_rate: Sample) {
        Node::sample_rate_changed(self, sample_rate);
    }
    fn buffer_size_changed(&mut self, buffer_size: usize) {
        Node::buffer_size_changed(self, buffer_size);
    }
}

/// What happened to a node. Sent from the audio thread after the period in
/// which it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEventKind {
    /// The node finished what it was doing, e.g. an envelope reached the end
    /// of its last segment.
    Finished,
    /// A ramp owned by the node reached its destination.
    RampFinished,
}

/// An event emitted by a node during processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEvent {
    /// The node that emitted the event
    pub node: NodeKey,
    #[allow(missing_docs)]
    pub kind: NodeEventKind,
    /// Sample time at the start of the period in which the event was emitted
    pub sample_time: u64,
}

/// Read access to the buffers connected to a node's input pins.
pub struct Inputs<'a> {
    pub(crate) nodes: &'a SlotMap<NodeKey, NodeSlot>,
    pub(crate) pins: &'a [crate::node_manager::pin::InputPinState],
}

impl<'a> Inputs<'a> {
    /// `None` if nothing is connected. With one connection this is the
    /// upstream buffer itself, with several it is their sum.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&'a [Sample]> {
        let pin = self.pins.get(index)?;
        match pin.connections.as_slice() {
            [] => None,
            [single] => self
                .nodes
                .get(single.node)
                .and_then(|slot| slot.outputs.get(single.index))
                .map(Vec::as_slice)
                // Empty when the upstream node is the one being processed
                .filter(|buffer| !buffer.is_empty()),
            _ => Some(pin.scratch.as_slice()),
        }
    }
    /// The number of output pins connected to an input.
    pub fn connection_count(&self, index: usize) -> usize {
        self.pins.get(index).map_or(0, |pin| pin.connections.len())
    }
}

/// Gives access to the inputs and outputs of a node while it is processed.
pub struct ProcessContext<'a> {
    pub(crate) node: NodeKey,
    pub(crate) inputs: Inputs<'a>,
    pub(crate) outputs: &'a mut [Vec<Sample>],
    pub(crate) device_inputs: &'a [Vec<Sample>],
    pub(crate) device_outputs: &'a mut [Vec<Sample>],
    pub(crate) events: &'a mut Vec<NodeEvent>,
    pub(crate) dropped_events: &'a mut u64,
    pub(crate) sample_rate: Sample,
    pub(crate) buffer_size: usize,
    pub(crate) sample_time: u64,
}

impl<'a> ProcessContext<'a> {
    /// The buffer of input `index` for this period. See [`Inputs::get`].
    #[inline]
    pub fn input(&self, index: usize) -> Option<&'a [Sample]> {
        self.inputs.get(index)
    }
    #[allow(missing_docs)]
    pub fn inputs(&self) -> &Inputs<'a> {
        &self.inputs
    }
    /// The buffer for output `index`. It holds whatever the node wrote the
    /// last period and has to be overwritten.
    ///
    /// # Panics
    /// If `index` is not smaller than [`Node::num_outputs`].
    #[inline]
    pub fn output(&mut self, index: usize) -> &mut [Sample] {
        &mut self.outputs[index]
    }
    #[allow(missing_docs)]
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }
    /// Write silence to every output.
    pub fn clear_outputs(&mut self) {
        for output in self.outputs.iter_mut() {
            output.fill(0.0);
        }
    }
    /// A channel of the buffer handed to [`NodeManager::process`](crate::node_manager::NodeManager::process).
    pub fn device_input(&self, channel: usize) -> Option<&'a [Sample]> {
        self.device_inputs.get(channel).map(Vec::as_slice)
    }
    /// A channel of the device output mix for this period.
    pub fn device_output(&mut self, channel: usize) -> Option<&mut [Sample]> {
        self.device_outputs.get_mut(channel).map(Vec::as_mut_slice)
    }
    /// Emit an event for this node. Dropped if the period's event capacity is used up.
    pub fn emit(&mut self, kind: NodeEventKind) {
        if self.events.len() < self.events.capacity() {
            self.events.push(NodeEvent {
                node: self.node,
                kind,
                sample_time: self.sample_time,
            });
        } else {
            *self.dropped_events += 1;
        }
    }
    /// The key of the node being processed.
    pub fn node(&self) -> NodeKey {
        self.node
    }
    #[allow(missing_docs)]
    pub fn sample_rate(&self) -> Sample {
        self.sample_rate
    }
    /// The number of samples in this period.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
    /// Sample time at the start of this period.
    pub fn sample_time(&self) -> u64 {
        self.sample_time
    }
}
