//! [`NodeManager`] is the single authority over the audio graph: it owns the
//! nodes, runs the period-by-period processing on the audio thread and
//! serialises changes made from other threads.
//!
//! ```
//! use tonverk::prelude::*;
//! let node_manager = NodeManager::new(NodeManagerSettings {
//!     internal_buffer_size: 4,
//!     output_channel_count: 1,
//!     ..Default::default()
//! });
//! let constant = node_manager.make_safe(ControlNode::new(&node_manager, 0.5));
//! let output = node_manager.make_safe(OutputNode::new(0));
//! node_manager.connect(constant.output(0), output.input(0))?;
//! node_manager.register_root_process(output.key())?;
//!
//! let mut left = [0.0; 4];
//! node_manager.process(&[], &mut [&mut left[..]]);
//! assert_eq!(left, [0.5; 4]);
//! # Ok::<(), tonverk::TonverkError>(())
//! ```
//!
//! Every change to connections, root registration or typed node state is made
//! through the guard returned by [`NodeManager::lock`], which is the same lock
//! the audio thread holds while it processes a period. Keep the critical
//! sections short and build anything that allocates before taking the lock.

mod graph;
pub mod pin;
mod safe_ptr;
mod trash_bin;
#[cfg(test)]
mod tests;

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rtrb::{Consumer, Producer, RingBuffer};
use slotmap::{new_key_type, SecondaryMap};

pub use graph::Graph;
pub(crate) use graph::NodeSlot;
pub use pin::{InputPin, OutputPin};
pub use safe_ptr::{SafeOwner, SafePtr};

use crate::node::{Node, NodeEvent};
use crate::Sample;
use trash_bin::TrashBin;

new_key_type! {
    /// Identifies a node in the graph of one [`NodeManager`]. Keys of reclaimed
    /// nodes are never reused.
    pub struct NodeKey;
}

/// Error connecting or disconnecting pins.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The node was never in this graph or has been reclaimed
    #[error("The node {0:?} does not exist in this graph, it may have been released")]
    NodeNotFound(NodeKey),
    #[allow(missing_docs)]
    #[error("Node \"{name}\" has {num_inputs} inputs, there is no input {index}")]
    InputOutOfRange {
        name: &'static str,
        index: usize,
        num_inputs: usize,
    },
    #[allow(missing_docs)]
    #[error("Node \"{name}\" has {num_outputs} outputs, there is no output {index}")]
    OutputOutOfRange {
        name: &'static str,
        index: usize,
        num_outputs: usize,
    },
}

/// Settings for a [`NodeManager`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeManagerSettings {
    #[allow(missing_docs)]
    pub sample_rate: Sample,
    /// The number of samples processed per period. Host buffers are split into
    /// periods of this size.
    pub internal_buffer_size: usize,
    #[allow(missing_docs)]
    pub input_channel_count: usize,
    #[allow(missing_docs)]
    pub output_channel_count: usize,
    /// Preallocated room for nodes and root registrations
    pub node_capacity: usize,
    /// The number of released nodes that can wait for reclamation before the
    /// slower overflow path is used
    pub trash_capacity: usize,
    /// Maximum number of node events per period
    pub event_capacity: usize,
}

impl Default for NodeManagerSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            internal_buffer_size: 64,
            input_channel_count: 0,
            output_channel_count: 2,
            node_capacity: 1024,
            trash_capacity: 1024,
            event_capacity: 256,
        }
    }
}

/// Timing information readable from any thread without the processing lock.
#[derive(Debug)]
pub struct Clock {
    sample_rate: AtomicU32,
    buffer_size: AtomicUsize,
    sample_time: AtomicU64,
}

impl Clock {
    fn new(sample_rate: Sample, buffer_size: usize) -> Self {
        Self {
            sample_rate: AtomicU32::new(sample_rate.to_bits()),
            buffer_size: AtomicUsize::new(buffer_size),
            sample_time: AtomicU64::new(0),
        }
    }
    #[allow(missing_docs)]
    pub fn sample_rate(&self) -> Sample {
        Sample::from_bits(self.sample_rate.load(Ordering::Relaxed))
    }
    #[allow(missing_docs)]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size.load(Ordering::Relaxed)
    }
    /// The number of samples processed since the manager was created.
    pub fn sample_time(&self) -> u64 {
        self.sample_time.load(Ordering::Relaxed)
    }
    #[allow(missing_docs)]
    pub fn samples_per_millisecond(&self) -> Sample {
        self.sample_rate() / 1000.0
    }
    /// Convert a duration in milliseconds to a whole number of samples.
    pub fn ms_to_samples(&self, ms: Sample) -> u64 {
        (ms.max(0.0) * self.samples_per_millisecond()).round() as u64
    }
}

/// Runs on the audio thread, with the processing lock held, after the period
/// in which the node emitted the event.
pub type EventHandler = Box<dyn FnMut(&mut Graph, &NodeEvent) + Send>;

struct Locked {
    graph: Graph,
    handlers: SecondaryMap<NodeKey, EventHandler>,
    events: Producer<NodeEvent>,
}

struct Shared {
    locked: Mutex<Locked>,
    trash: TrashBin,
    event_consumer: Mutex<Consumer<NodeEvent>>,
    clock: Arc<Clock>,
    dropped_events: AtomicU64,
}

/// Holds the processing lock. Derefs to the [`Graph`].
pub struct GraphGuard<'a> {
    locked: MutexGuard<'a, Locked>,
}

impl<'a> GraphGuard<'a> {
    /// Register a handler for events emitted by `node`, replacing any previous one.
    /// The handler is dropped when the node is reclaimed.
    pub fn set_event_handler(
        &mut self,
        node: NodeKey,
        handler: impl FnMut(&mut Graph, &NodeEvent) + Send + 'static,
    ) -> Result<(), ConnectionError> {
        if !self.locked.graph.contains(node) {
            return Err(ConnectionError::NodeNotFound(node));
        }
        self.locked.handlers.insert(node, Box::new(handler));
        Ok(())
    }
    #[allow(missing_docs)]
    pub fn remove_event_handler(&mut self, node: NodeKey) {
        self.locked.handlers.remove(node);
    }
}

impl<'a> Deref for GraphGuard<'a> {
    type Target = Graph;

    fn deref(&self) -> &Self::Target {
        &self.locked.graph
    }
}

impl<'a> DerefMut for GraphGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.locked.graph
    }
}

/// The owner of the audio graph. Cloning gives another handle to the same graph.
///
/// See the [module level docs](self).
#[derive(Clone)]
pub struct NodeManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for NodeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeManager")
            .field("sample_rate", &self.sample_rate())
            .field("internal_buffer_size", &self.internal_buffer_size())
            .field("sample_time", &self.sample_time())
            .finish_non_exhaustive()
    }
}

impl NodeManager {
    #[allow(missing_docs)]
    pub fn new(settings: NodeManagerSettings) -> Self {
        let (producer, consumer) = RingBuffer::new(settings.event_capacity.max(1));
        tracing::debug!(?settings, "Creating NodeManager");
        Self {
            shared: Arc::new(Shared {
                locked: Mutex::new(Locked {
                    graph: Graph::new(&settings),
                    handlers: SecondaryMap::new(),
                    events: producer,
                }),
                trash: TrashBin::new(settings.trash_capacity),
                event_consumer: Mutex::new(consumer),
                clock: Arc::new(Clock::new(
                    settings.sample_rate,
                    settings.internal_buffer_size,
                )),
                dropped_events: AtomicU64::new(0),
            }),
        }
    }

    /// Move a node into the graph. The returned owner is the only way to
    /// release it again.
    ///
    /// The node's buffers are allocated before the processing lock is taken.
    pub fn make_safe<T: Node>(&self, mut node: T) -> SafeOwner<T> {
        let controls = node.controls();
        let buffer_size = self.internal_buffer_size();
        node.sample_rate_changed(self.sample_rate());
        node.buffer_size_changed(buffer_size);
        let name = node.name();
        let slot = NodeSlot::new(Box::new(node), buffer_size);
        let key = self.shared.locked.lock().graph.insert(slot);
        tracing::trace!(node = name, ?key, "Made node safe");
        SafeOwner::new(key, self.clone(), controls)
    }

    /// Take the processing lock.
    pub fn lock(&self) -> GraphGuard<'_> {
        GraphGuard {
            locked: self.shared.locked.lock(),
        }
    }

    /// Connect two pins, taking the processing lock.
    pub fn connect(&self, output: OutputPin, input: InputPin) -> Result<(), ConnectionError> {
        self.lock().connect(output, input)
    }

    /// Disconnect two pins, taking the processing lock.
    pub fn disconnect(&self, output: OutputPin, input: InputPin) -> Result<(), ConnectionError> {
        self.lock().disconnect(output, input)
    }

    /// See [`Graph::register_root`].
    pub fn register_root_process(&self, node: NodeKey) -> Result<(), ConnectionError> {
        self.lock().register_root(node)
    }

    #[allow(missing_docs)]
    pub fn unregister_root_process(&self, node: NodeKey) {
        self.lock().unregister_root(node);
    }

    /// Run `f` on a node with the processing lock held.
    pub fn with_node<T: Node, R>(&self, node: NodeKey, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.lock().node_mut::<T>(node).map(f)
    }

    /// The audio callback. Processes as many whole periods as fit in the
    /// longest of the given buffers. Missing input channels read as silence,
    /// output samples after the last whole period are zeroed.
    pub fn process(&self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]) {
        let frames = outputs
            .iter()
            .map(|output| output.len())
            .chain(inputs.iter().map(|input| input.len()))
            .max()
            .unwrap_or(0);
        let mut locked = self.shared.locked.lock();
        let buffer_size = locked.graph.buffer_size();
        let mut offset = 0;
        if buffer_size > 0 {
            while offset + buffer_size <= frames {
                locked.graph.load_device_inputs(inputs, offset);
                self.run_period(&mut locked);
                locked.graph.store_device_outputs(outputs, offset);
                offset += buffer_size;
            }
        }
        for output in outputs.iter_mut() {
            if let Some(rest) = output.get_mut(offset..) {
                rest.fill(0.0);
            }
        }
    }

    /// Process a single period without device input and copy the device
    /// output channels into `outputs`.
    pub fn render(&self, outputs: &mut [Vec<Sample>]) {
        let mut locked = self.shared.locked.lock();
        locked.graph.load_device_inputs(&[], 0);
        self.run_period(&mut locked);
        let device_outputs = locked.graph.device_outputs();
        for (channel, output) in outputs.iter_mut().enumerate() {
            match device_outputs.get(channel) {
                Some(source) => {
                    let len = output.len().min(source.len());
                    output[..len].copy_from_slice(&source[..len]);
                    output[len..].fill(0.0);
                }
                None => output.fill(0.0),
            }
        }
    }

    /// Process a single period, ignoring the device output.
    pub fn process_period(&self) {
        let mut locked = self.shared.locked.lock();
        self.run_period(&mut locked);
    }

    fn run_period(&self, locked: &mut Locked) {
        let shared = &*self.shared;
        realtime(|| {
            let Locked {
                graph,
                handlers,
                events,
            } = locked;
            graph.process_period();
            for i in 0..graph.events.len() {
                let event = graph.events[i];
                if let Some(handler) = handlers.get_mut(event.node) {
                    handler(graph, &event);
                }
                if events.push(event).is_err() {
                    graph.dropped_events += 1;
                }
            }
            graph.events.clear();
            permit_dealloc(|| {
                shared.trash.drain(|key| {
                    if graph.remove(key).is_some() {
                        handlers.remove(key);
                    }
                });
            });
            if graph.dropped_events > 0 {
                shared
                    .dropped_events
                    .fetch_add(graph.dropped_events, Ordering::Relaxed);
                graph.dropped_events = 0;
            }
            graph.advance_sample_time();
            shared
                .clock
                .sample_time
                .store(graph.sample_time(), Ordering::Relaxed);
        });
    }

    /// Call `f` for every node event received since the last poll. Returns the
    /// number of events.
    pub fn poll_events(&self, mut f: impl FnMut(NodeEvent)) -> usize {
        let dropped = self.shared.dropped_events.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            tracing::warn!(dropped, "Node events were dropped, the event capacity is too small");
        }
        let overflowed = self.shared.trash.take_overflow_count();
        if overflowed > 0 {
            tracing::warn!(
                overflowed,
                capacity = self.shared.trash.capacity(),
                "Trash bin queue was full, node releases went through the overflow list"
            );
        }
        let mut consumer = self.shared.event_consumer.lock();
        let mut count = 0;
        while let Ok(event) = consumer.pop() {
            f(event);
            count += 1;
        }
        count
    }

    pub(crate) fn dispose(&self, key: NodeKey) {
        self.shared.trash.dispose(key);
    }

    /// The number of released nodes waiting to be reclaimed.
    pub fn pending_release_count(&self) -> usize {
        self.shared.trash.len()
    }

    /// Timing information that can be read without the processing lock.
    pub fn clock(&self) -> Arc<Clock> {
        self.shared.clock.clone()
    }

    #[allow(missing_docs)]
    pub fn sample_rate(&self) -> Sample {
        self.shared.clock.sample_rate()
    }

    /// Broadcast a new sample rate to every node, with the processing lock held.
    pub fn set_sample_rate(&self, sample_rate: Sample) {
        let mut graph = self.lock();
        graph.set_sample_rate(sample_rate);
        self.shared
            .clock
            .sample_rate
            .store(sample_rate.to_bits(), Ordering::Relaxed);
        tracing::debug!(sample_rate, nodes = graph.node_count(), "Sample rate changed");
    }

    /// The number of samples per period.
    pub fn internal_buffer_size(&self) -> usize {
        self.shared.clock.buffer_size()
    }

    /// Resize every buffer in the graph, with the processing lock held.
    pub fn set_internal_buffer_size(&self, buffer_size: usize) {
        let mut graph = self.lock();
        graph.set_buffer_size(buffer_size);
        self.shared
            .clock
            .buffer_size
            .store(buffer_size, Ordering::Relaxed);
        tracing::debug!(buffer_size, "Internal buffer size changed");
    }

    #[allow(missing_docs)]
    pub fn samples_per_millisecond(&self) -> Sample {
        self.shared.clock.samples_per_millisecond()
    }

    /// The number of samples processed so far.
    pub fn sample_time(&self) -> u64 {
        self.shared.clock.sample_time()
    }

    #[allow(missing_docs)]
    pub fn input_channel_count(&self) -> usize {
        self.lock().input_channel_count()
    }

    #[allow(missing_docs)]
    pub fn output_channel_count(&self) -> usize {
        self.lock().output_channel_count()
    }

    /// Change the number of device channels, with the processing lock held.
    pub fn set_channel_counts(&self, inputs: usize, outputs: usize) {
        self.lock().set_device_channel_counts(inputs, outputs);
        tracing::debug!(inputs, outputs, "Device channel counts changed");
    }
}

#[cfg(feature = "assert-no-alloc")]
#[inline]
fn realtime<R>(f: impl FnOnce() -> R) -> R {
    assert_no_alloc::assert_no_alloc(f)
}
#[cfg(not(feature = "assert-no-alloc"))]
#[inline]
fn realtime<R>(f: impl FnOnce() -> R) -> R {
    f()
}
#[cfg(feature = "assert-no-alloc")]
#[inline]
fn permit_dealloc<R>(f: impl FnOnce() -> R) -> R {
    assert_no_alloc::permit_alloc(f)
}
#[cfg(not(feature = "assert-no-alloc"))]
#[inline]
fn permit_dealloc<R>(f: impl FnOnce() -> R) -> R {
    f()
}
