//! The live graph. Everything in here is only touched with the processing lock
//! held, either by the audio thread for the duration of a period or by a
//! control thread making a change.

use std::mem;

use slotmap::SlotMap;

use super::pin::{InputPin, InputPinState, OutputPin};
use super::{ConnectionError, NodeKey, NodeManagerSettings};
use crate::node::{DynNode, Inputs, Node, NodeEvent, ProcessContext};
use crate::Sample;

/// A node and the buffers around it.
pub(crate) struct NodeSlot {
    /// Only `None` while the node is being processed.
    pub(crate) node: Option<Box<dyn DynNode>>,
    pub(crate) name: &'static str,
    pub(crate) inputs: Vec<InputPinState>,
    /// One buffer per output pin, valid for the current period once processed.
    pub(crate) outputs: Vec<Vec<Sample>>,
    num_outputs: usize,
    /// The last period in which the node was pulled.
    last_period: u64,
}

impl NodeSlot {
    /// *Allocates memory*
    pub(crate) fn new(node: Box<dyn DynNode>, buffer_size: usize) -> Self {
        let num_outputs = node.num_outputs();
        Self {
            name: node.name(),
            inputs: (0..node.num_inputs())
                .map(|_| InputPinState::new(buffer_size))
                .collect(),
            outputs: vec![vec![0.0; buffer_size]; num_outputs],
            num_outputs,
            node: Some(node),
            last_period: 0,
        }
    }

    fn buffer_size(&self) -> usize {
        self.outputs
            .first()
            .map(Vec::len)
            .or_else(|| self.inputs.first().map(|pin| pin.scratch.len()))
            .unwrap_or(0)
    }

    /// *Allocates memory*
    fn resize(&mut self, buffer_size: usize) {
        for output in &mut self.outputs {
            output.resize(buffer_size, 0.0);
        }
        for pin in &mut self.inputs {
            pin.scratch.resize(buffer_size, 0.0);
        }
    }
}

/// The nodes, their connections and the set of root nodes. Get to it through
/// [`NodeManager::lock`](super::NodeManager::lock).
pub struct Graph {
    pub(crate) nodes: SlotMap<NodeKey, NodeSlot>,
    roots: Vec<NodeKey>,
    device_inputs: Vec<Vec<Sample>>,
    device_outputs: Vec<Vec<Sample>>,
    pub(crate) events: Vec<NodeEvent>,
    pub(crate) dropped_events: u64,
    period: u64,
    sample_rate: Sample,
    buffer_size: usize,
    sample_time: u64,
}

impl Graph {
    pub(crate) fn new(settings: &NodeManagerSettings) -> Self {
        let buffer_size = settings.internal_buffer_size;
        Self {
            nodes: SlotMap::with_capacity_and_key(settings.node_capacity),
            roots: Vec::with_capacity(settings.node_capacity),
            device_inputs: vec![vec![0.0; buffer_size]; settings.input_channel_count],
            device_outputs: vec![vec![0.0; buffer_size]; settings.output_channel_count],
            events: Vec::with_capacity(settings.event_capacity),
            dropped_events: 0,
            period: 0,
            sample_rate: settings.sample_rate,
            buffer_size,
            sample_time: 0,
        }
    }

    pub(crate) fn insert(&mut self, mut slot: NodeSlot) -> NodeKey {
        if slot.node.is_some() {
            // The settings may have changed since the slot was built outside the lock
            if slot.buffer_size() != self.buffer_size {
                slot.resize(self.buffer_size);
                if let Some(node) = slot.node.as_mut() {
                    node.buffer_size_changed(self.buffer_size);
                }
            }
        }
        self.nodes.insert(slot)
    }

    /// Take a node out of the graph, cutting every connection to and from it.
    pub(crate) fn remove(&mut self, key: NodeKey) -> Option<NodeSlot> {
        let slot = self.nodes.remove(key)?;
        self.roots.retain(|root| *root != key);
        for (_, other) in self.nodes.iter_mut() {
            for pin in &mut other.inputs {
                pin.connections.retain(|connection| connection.node != key);
            }
        }
        Some(slot)
    }

    /// Connect an output to an input. Connecting the same pair twice has no effect.
    pub fn connect(&mut self, output: OutputPin, input: InputPin) -> Result<(), ConnectionError> {
        self.check_output(output)?;
        let pin = self.input_state_mut(input)?;
        if !pin.connections.contains(&output) {
            pin.connections.push(output);
        }
        Ok(())
    }

    /// Remove a connection. Disconnecting pins that aren't connected is not an error.
    pub fn disconnect(
        &mut self,
        output: OutputPin,
        input: InputPin,
    ) -> Result<(), ConnectionError> {
        let pin = self.input_state_mut(input)?;
        pin.connections.retain(|connection| *connection != output);
        Ok(())
    }

    /// Remove every connection to an input.
    pub fn disconnect_input(&mut self, input: InputPin) -> Result<(), ConnectionError> {
        self.input_state_mut(input)?.connections.clear();
        Ok(())
    }

    /// The outputs connected to an input.
    pub fn input_connections(&self, input: InputPin) -> Result<&[OutputPin], ConnectionError> {
        let slot = self
            .nodes
            .get(input.node)
            .ok_or(ConnectionError::NodeNotFound(input.node))?;
        slot.inputs
            .get(input.index)
            .map(|pin| pin.connections.as_slice())
            .ok_or(ConnectionError::InputOutOfRange {
                name: slot.name,
                index: input.index,
                num_inputs: slot.inputs.len(),
            })
    }

    fn check_output(&self, output: OutputPin) -> Result<(), ConnectionError> {
        let slot = self
            .nodes
            .get(output.node)
            .ok_or(ConnectionError::NodeNotFound(output.node))?;
        if output.index >= slot.num_outputs {
            return Err(ConnectionError::OutputOutOfRange {
                name: slot.name,
                index: output.index,
                num_outputs: slot.num_outputs,
            });
        }
        Ok(())
    }

    fn input_state_mut(&mut self, input: InputPin) -> Result<&mut InputPinState, ConnectionError> {
        let slot = self
            .nodes
            .get_mut(input.node)
            .ok_or(ConnectionError::NodeNotFound(input.node))?;
        let num_inputs = slot.inputs.len();
        let name = slot.name;
        slot.inputs
            .get_mut(input.index)
            .ok_or(ConnectionError::InputOutOfRange {
                name,
                index: input.index,
                num_inputs,
            })
    }

    /// Pull the node once per period. A node that is pulled by another root
    /// should not be registered itself.
    pub fn register_root(&mut self, node: NodeKey) -> Result<(), ConnectionError> {
        if !self.nodes.contains_key(node) {
            return Err(ConnectionError::NodeNotFound(node));
        }
        if !self.roots.contains(&node) {
            self.roots.push(node);
        }
        Ok(())
    }

    #[allow(missing_docs)]
    pub fn unregister_root(&mut self, node: NodeKey) {
        self.roots.retain(|root| *root != node);
    }

    #[allow(missing_docs)]
    pub fn is_root(&self, node: NodeKey) -> bool {
        self.roots.contains(&node)
    }

    /// False once a released node has been reclaimed.
    pub fn contains(&self, node: NodeKey) -> bool {
        self.nodes.contains_key(node)
    }

    #[allow(missing_docs)]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The name of the node, if it exists.
    pub fn node_name(&self, node: NodeKey) -> Option<&'static str> {
        self.nodes.get(node).map(|slot| slot.name)
    }

    /// The buffer an output produced in the last processed period.
    pub fn output_buffer(&self, output: OutputPin) -> Option<&[Sample]> {
        self.nodes
            .get(output.node)
            .and_then(|slot| slot.outputs.get(output.index))
            .map(Vec::as_slice)
    }

    /// Typed access to a node in the graph.
    pub fn node<T: Node>(&self, key: NodeKey) -> Option<&T> {
        self.nodes
            .get(key)
            .and_then(|slot| slot.node.as_ref())
            .and_then(|node| node.downcast_ref::<T>())
    }

    /// Typed mutable access to a node in the graph.
    pub fn node_mut<T: Node>(&mut self, key: NodeKey) -> Option<&mut T> {
        self.nodes
            .get_mut(key)
            .and_then(|slot| slot.node.as_mut())
            .and_then(|node| node.downcast_mut::<T>())
    }

    #[allow(missing_docs)]
    pub fn sample_rate(&self) -> Sample {
        self.sample_rate
    }
    /// The number of samples in a period.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
    /// Sample time at the start of the next period.
    pub fn sample_time(&self) -> u64 {
        self.sample_time
    }
    #[allow(missing_docs)]
    pub fn input_channel_count(&self) -> usize {
        self.device_inputs.len()
    }
    #[allow(missing_docs)]
    pub fn output_channel_count(&self) -> usize {
        self.device_outputs.len()
    }
    /// The device output mix of the last period, one buffer per channel.
    pub fn device_outputs(&self) -> &[Vec<Sample>] {
        &self.device_outputs
    }

    pub(crate) fn set_sample_rate(&mut self, sample_rate: Sample) {
        self.sample_rate = sample_rate;
        for (_, slot) in self.nodes.iter_mut() {
            if let Some(node) = slot.node.as_mut() {
                node.sample_rate_changed(sample_rate);
            }
        }
    }

    /// *Allocates memory*
    pub(crate) fn set_buffer_size(&mut self, buffer_size: usize) {
        self.buffer_size = buffer_size;
        for buffer in self.device_inputs.iter_mut().chain(&mut self.device_outputs) {
            buffer.resize(buffer_size, 0.0);
        }
        for (_, slot) in self.nodes.iter_mut() {
            slot.resize(buffer_size);
            if let Some(node) = slot.node.as_mut() {
                node.buffer_size_changed(buffer_size);
            }
        }
    }

    /// *Allocates memory*
    pub(crate) fn set_device_channel_counts(&mut self, inputs: usize, outputs: usize) {
        let buffer_size = self.buffer_size;
        self.device_inputs.resize_with(inputs, || vec![0.0; buffer_size]);
        self.device_outputs.resize_with(outputs, || vec![0.0; buffer_size]);
    }

    /// Copy one period of the host input, starting at `offset`, into the device input buffers.
    pub(crate) fn load_device_inputs(&mut self, inputs: &[&[Sample]], offset: usize) {
        for (channel, buffer) in self.device_inputs.iter_mut().enumerate() {
            let source = inputs
                .get(channel)
                .and_then(|input| input.get(offset..))
                .unwrap_or(&[]);
            let len = source.len().min(buffer.len());
            buffer[..len].copy_from_slice(&source[..len]);
            buffer[len..].fill(0.0);
        }
    }

    /// Copy the device output buffers into the host output at `offset`.
    pub(crate) fn store_device_outputs(&self, outputs: &mut [&mut [Sample]], offset: usize) {
        for (channel, output) in outputs.iter_mut().enumerate() {
            let Some(destination) = output.get_mut(offset..) else {
                continue;
            };
            let len = destination.len().min(self.buffer_size);
            match self.device_outputs.get(channel) {
                Some(source) => destination[..len].copy_from_slice(&source[..len]),
                None => destination[..len].fill(0.0),
            }
        }
    }

    /// Pull every root. Events emitted during the period are left in `events`.
    pub(crate) fn process_period(&mut self) {
        self.period += 1;
        for buffer in &mut self.device_outputs {
            buffer.fill(0.0);
        }
        for i in 0..self.roots.len() {
            let root = self.roots[i];
            self.pull(root);
        }
    }

    pub(crate) fn advance_sample_time(&mut self) {
        self.sample_time += self.buffer_size as u64;
    }

    /// Process `key` after everything it depends on, at most once per period.
    fn pull(&mut self, key: NodeKey) {
        let period = self.period;
        let mut pins = match self.nodes.get_mut(key) {
            Some(slot) if slot.last_period != period => {
                slot.last_period = period;
                mem::take(&mut slot.inputs)
            }
            // Already processed this period, or a cycle back to a node being processed
            _ => return,
        };
        for pin in &pins {
            for connection in &pin.connections {
                self.pull(connection.node);
            }
        }
        for pin in &mut pins {
            if pin.connections.len() < 2 {
                continue;
            }
            pin.scratch.fill(0.0);
            for connection in &pin.connections {
                if connection.node == key {
                    continue;
                }
                let Some(buffer) = self
                    .nodes
                    .get(connection.node)
                    .and_then(|slot| slot.outputs.get(connection.index))
                else {
                    continue;
                };
                for (sum, sample) in pin.scratch.iter_mut().zip(buffer) {
                    *sum += *sample;
                }
            }
        }

        let Graph {
            nodes,
            device_inputs,
            device_outputs,
            events,
            dropped_events,
            sample_rate,
            buffer_size,
            sample_time,
            ..
        } = self;
        let Some(slot) = nodes.get_mut(key) else {
            return;
        };
        let node = slot.node.take();
        let mut outputs = mem::take(&mut slot.outputs);
        let node = node.map(|mut node| {
            let mut ctx = ProcessContext {
                node: key,
                inputs: Inputs {
                    nodes: &*nodes,
                    pins: &pins,
                },
                outputs: &mut outputs,
                device_inputs: device_inputs.as_slice(),
                device_outputs: device_outputs.as_mut_slice(),
                events,
                dropped_events,
                sample_rate: *sample_rate,
                buffer_size: *buffer_size,
                sample_time: *sample_time,
            };
            node.process(&mut ctx);
            node
        });
        if let Some(slot) = nodes.get_mut(key) {
            slot.node = node;
            slot.outputs = outputs;
            slot.inputs = pins;
        }
    }
}
