//! Objects made of one node per channel, and the node objects built on them.

use crate::node::Node;
use crate::node_manager::{InputPin, NodeManager, OutputPin, SafeOwner};
use crate::nodes::{
    ControlNode, DelayNode, EnvelopeNode, FilterMode, FilterNode, GainNode, InputNode,
    LevelMeterNode, MeterType, MixNode, OutputNode, Segment,
};
use crate::ramped_value::RampMode;
use crate::Sample;

use super::{AudioObject, AudioObjectInstance, ErrorState, ObjectError};

type CreateFn<T> = dyn Fn(&NodeManager, usize) -> T + Send + Sync;
type ConfigureFn<T> = dyn Fn(usize, &SafeOwner<T>) + Send + Sync;

/// `channel_count` copies of one node type, created by a factory function and
/// optionally configured per channel once they are in the graph.
///
/// ```
/// use tonverk::prelude::*;
/// use tonverk::object::ParallelNodeObject;
///
/// let node_manager = NodeManager::new(NodeManagerSettings::default());
/// let object = ParallelNodeObject::new("gains", 4, |nm, _channel| GainNode::new(nm, 1.0))
///     .with_input("audio", 0)
///     .with_configure(|channel, node| {
///         node.set_gain(1.0 / (channel + 1) as f32, 0.0, RampMode::Linear)
///     });
/// let instance = object
///     .instantiate_parallel(&node_manager, &mut ErrorState::new())
///     .expect("valid object");
/// assert_eq!(instance.channels().len(), 4);
/// ```
pub struct ParallelNodeObject<T: Node> {
    id: String,
    channel_count: usize,
    create: Box<CreateFn<T>>,
    configure: Option<Box<ConfigureFn<T>>>,
    inputs: Vec<(&'static str, usize)>,
    roots: bool,
}

impl<T: Node> ParallelNodeObject<T> {
    #[allow(missing_docs)]
    pub fn new(
        id: impl Into<String>,
        channel_count: usize,
        create: impl Fn(&NodeManager, usize) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            channel_count,
            create: Box::new(create),
            configure: None,
            inputs: Vec::new(),
            roots: false,
        }
    }
    /// Run `configure` for every channel once the nodes are in the graph.
    pub fn with_configure(
        mut self,
        configure: impl Fn(usize, &SafeOwner<T>) + Send + Sync + 'static,
    ) -> Self {
        self.configure = Some(Box::new(configure));
        self
    }
    /// Expose input pin `pin` of each node under `name`. The first input
    /// added is the default input.
    pub fn with_input(mut self, name: &'static str, pin: usize) -> Self {
        self.inputs.push((name, pin));
        self
    }
    /// Register every node as a root process, for nodes nothing else pulls.
    pub fn as_roots(mut self) -> Self {
        self.roots = true;
        self
    }

    /// Like [`AudioObject::instantiate`], keeping the node type.
    pub fn instantiate_parallel(
        &self,
        node_manager: &NodeManager,
        errors: &mut ErrorState,
    ) -> Option<ParallelNodeInstance<T>> {
        if !errors.check(self.channel_count > 0, || ObjectError::InvalidSetting {
            object: self.id.clone(),
            message: "the channel count must be at least 1".to_string(),
        }) {
            return None;
        }
        let mut output_count = 0;
        let nodes: Vec<SafeOwner<T>> = (0..self.channel_count)
            .map(|channel| {
                let node = (self.create)(node_manager, channel);
                output_count = node.num_outputs();
                node_manager.make_safe(node)
            })
            .collect();
        if let Some(configure) = &self.configure {
            for (channel, node) in nodes.iter().enumerate() {
                configure(channel, node);
            }
        }
        let mut instance = ParallelNodeInstance {
            nodes,
            inputs: self.inputs.clone(),
            output_count,
            roots: false,
        };
        if self.roots {
            let mut graph = node_manager.lock();
            for node in &instance.nodes {
                if let Err(source) = graph.register_root(node.key()) {
                    for node in &instance.nodes {
                        graph.unregister_root(node.key());
                    }
                    errors.push(ObjectError::Connection {
                        object: self.id.clone(),
                        source,
                    });
                    return None;
                }
            }
            instance.roots = true;
        }
        tracing::trace!(object = %self.id, channels = self.channel_count, "Instantiated");
        Some(instance)
    }
}

impl<T: Node> AudioObject for ParallelNodeObject<T> {
    fn id(&self) -> &str {
        &self.id
    }
    fn instantiate(
        &self,
        node_manager: &NodeManager,
        errors: &mut ErrorState,
    ) -> Option<Box<dyn AudioObjectInstance>> {
        self.instantiate_parallel(node_manager, errors)
            .map(|instance| Box::new(instance) as Box<dyn AudioObjectInstance>)
    }
}

/// The live nodes of a [`ParallelNodeObject`], one per channel.
///
/// Dropping an instance whose nodes are roots takes the processing lock, so
/// don't drop one while holding a [`GraphGuard`](crate::node_manager::GraphGuard).
pub struct ParallelNodeInstance<T: Node> {
    nodes: Vec<SafeOwner<T>>,
    inputs: Vec<(&'static str, usize)>,
    output_count: usize,
    roots: bool,
}

impl<T: Node> ParallelNodeInstance<T> {
    /// The node of one channel.
    ///
    /// # Panics
    /// If `channel` is out of range.
    pub fn channel(&self, channel: usize) -> &SafeOwner<T> {
        assert!(
            channel < self.nodes.len(),
            "Channel {channel} out of range, the object has {} channels",
            self.nodes.len()
        );
        &self.nodes[channel]
    }
    #[allow(missing_docs)]
    pub fn channels(&self) -> &[SafeOwner<T>] {
        &self.nodes
    }
}

impl<T: Node> Drop for ParallelNodeInstance<T> {
    fn drop(&mut self) {
        // Stop pulling before the owners release the nodes
        if let (true, Some(first)) = (self.roots, self.nodes.first()) {
            let mut graph = first.node_manager().lock();
            for node in &self.nodes {
                graph.unregister_root(node.key());
            }
        }
    }
}

impl<T: Node> AudioObjectInstance for ParallelNodeInstance<T> {
    fn channel_count(&self) -> usize {
        if self.output_count > 0 {
            self.nodes.len()
        } else {
            0
        }
    }
    fn output_for_channel(&self, channel: usize) -> OutputPin {
        assert!(
            channel < self.channel_count(),
            "Channel {channel} out of range, the object has {} output channels",
            self.channel_count()
        );
        self.nodes[channel].output(0)
    }
    fn input_channel_count(&self) -> usize {
        if self.inputs.is_empty() {
            0
        } else {
            self.nodes.len()
        }
    }
    fn input_for_channel(&self, channel: usize) -> Option<InputPin> {
        let (_, pin) = self.inputs.first()?;
        self.nodes.get(channel).map(|node| node.input(*pin))
    }
    fn named_input(&self, name: &str, channel: usize) -> Option<InputPin> {
        let (_, pin) = self.inputs.iter().find(|(n, _)| *n == name)?;
        self.nodes.get(channel).map(|node| node.input(*pin))
    }
}

macro_rules! forward_audio_object {
    ($object:ty) => {
        impl AudioObject for $object {
            fn id(&self) -> &str {
                &self.id
            }
            fn instantiate(
                &self,
                node_manager: &NodeManager,
                errors: &mut ErrorState,
            ) -> Option<Box<dyn AudioObjectInstance>> {
                self.to_parallel().instantiate(node_manager, errors)
            }
        }
    };
}

/// A [`GainNode`] per channel.
///
/// *inputs* "audio", "modulation"
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct GainObject {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub channel_count: usize,
    #[allow(missing_docs)]
    pub gain: Sample,
}

impl GainObject {
    #[allow(missing_docs)]
    pub fn new(id: impl Into<String>, channel_count: usize, gain: Sample) -> Self {
        Self {
            id: id.into(),
            channel_count,
            gain,
        }
    }
    #[allow(missing_docs)]
    pub fn to_parallel(&self) -> ParallelNodeObject<GainNode> {
        let gain = self.gain;
        ParallelNodeObject::new(self.id.clone(), self.channel_count, move |nm, _| {
            GainNode::new(nm, gain)
        })
        .with_input("audio", 0)
        .with_input("modulation", 1)
    }
}
forward_audio_object!(GainObject);

#[allow(missing_docs)]
pub type GainInstance = ParallelNodeInstance<GainNode>;

impl ParallelNodeInstance<GainNode> {
    /// Set the gain of every channel.
    pub fn set_gain(&self, gain: Sample, time_ms: Sample, mode: RampMode) {
        for node in &self.nodes {
            node.set_gain(gain, time_ms, mode);
        }
    }
}

/// A [`FilterNode`] per channel.
///
/// *inputs* "audio"
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterObject {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub channel_count: usize,
    #[allow(missing_docs)]
    pub mode: FilterMode,
    /// Cutoff or center frequency in Hz
    pub frequency: Sample,
    #[allow(missing_docs)]
    pub resonance: Sample,
}

impl FilterObject {
    #[allow(missing_docs)]
    pub fn new(
        id: impl Into<String>,
        channel_count: usize,
        mode: FilterMode,
        frequency: Sample,
    ) -> Self {
        Self {
            id: id.into(),
            channel_count,
            mode,
            frequency,
            resonance: 0.707,
        }
    }
    #[allow(missing_docs)]
    pub fn with_resonance(mut self, resonance: Sample) -> Self {
        self.resonance = resonance;
        self
    }
    #[allow(missing_docs)]
    pub fn to_parallel(&self) -> ParallelNodeObject<FilterNode> {
        let (mode, frequency, resonance) = (self.mode, self.frequency, self.resonance);
        ParallelNodeObject::new(self.id.clone(), self.channel_count, move |_, _| {
            FilterNode::new(mode, frequency, resonance)
        })
        .with_input("audio", 0)
    }
}
forward_audio_object!(FilterObject);

#[allow(missing_docs)]
pub type FilterInstance = ParallelNodeInstance<FilterNode>;

impl ParallelNodeInstance<FilterNode> {
    /// Set the frequency of every channel.
    pub fn set_frequency(&self, frequency: Sample) {
        for node in &self.nodes {
            node.set_frequency(frequency);
        }
    }
    /// Set the resonance of every channel.
    pub fn set_resonance(&self, resonance: Sample) {
        for node in &self.nodes {
            node.set_resonance(resonance);
        }
    }
}

/// A [`MixNode`] per channel. Everything connected to a channel is summed.
///
/// *inputs* "audio"
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct MixerObject {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub channel_count: usize,
}

impl MixerObject {
    #[allow(missing_docs)]
    pub fn new(id: impl Into<String>, channel_count: usize) -> Self {
        Self {
            id: id.into(),
            channel_count,
        }
    }
    #[allow(missing_docs)]
    pub fn to_parallel(&self) -> ParallelNodeObject<MixNode> {
        ParallelNodeObject::new(self.id.clone(), self.channel_count, |_, _| MixNode::new())
            .with_input("audio", 0)
    }
}
forward_audio_object!(MixerObject);

#[allow(missing_docs)]
pub type MixerInstance = ParallelNodeInstance<MixNode>;

/// A [`ControlNode`] per channel, all starting at the same value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlObject {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub channel_count: usize,
    #[allow(missing_docs)]
    pub value: Sample,
}

impl ControlObject {
    #[allow(missing_docs)]
    pub fn new(id: impl Into<String>, channel_count: usize, value: Sample) -> Self {
        Self {
            id: id.into(),
            channel_count,
            value,
        }
    }
    #[allow(missing_docs)]
    pub fn to_parallel(&self) -> ParallelNodeObject<ControlNode> {
        let value = self.value;
        ParallelNodeObject::new(self.id.clone(), self.channel_count, move |nm, _| {
            ControlNode::new(nm, value)
        })
    }
}
forward_audio_object!(ControlObject);

#[allow(missing_docs)]
pub type ControlInstance = ParallelNodeInstance<ControlNode>;

impl ParallelNodeInstance<ControlNode> {
    /// Ramp every channel to `value`.
    pub fn ramp(&self, value: Sample, time_ms: Sample, mode: RampMode) {
        for node in &self.nodes {
            node.ramp(value, time_ms, mode);
        }
    }
}

/// A [`DelayNode`] per channel. Each channel's delay time is offset by a
/// random amount of up to `spread_ms`, drawn from a generator seeded with
/// `seed` so the same description always decorrelates the same way.
///
/// *inputs* "audio"
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct DelayObject {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub channel_count: usize,
    #[allow(missing_docs)]
    pub max_delay_ms: Sample,
    #[allow(missing_docs)]
    pub time_ms: Sample,
    #[allow(missing_docs)]
    pub feedback: Sample,
    #[allow(missing_docs)]
    pub dry_wet: Sample,
    #[allow(missing_docs)]
    pub spread_ms: Sample,
    #[allow(missing_docs)]
    pub seed: u64,
}

impl DelayObject {
    /// Fully wet, no feedback and no spread.
    pub fn new(
        id: impl Into<String>,
        channel_count: usize,
        max_delay_ms: Sample,
        time_ms: Sample,
    ) -> Self {
        Self {
            id: id.into(),
            channel_count,
            max_delay_ms,
            time_ms,
            feedback: 0.0,
            dry_wet: 1.0,
            spread_ms: 0.0,
            seed: 0,
        }
    }
    #[allow(missing_docs)]
    pub fn with_feedback(mut self, feedback: Sample) -> Self {
        self.feedback = feedback;
        self
    }
    #[allow(missing_docs)]
    pub fn with_dry_wet(mut self, dry_wet: Sample) -> Self {
        self.dry_wet = dry_wet;
        self
    }
    #[allow(missing_docs)]
    pub fn with_spread(mut self, spread_ms: Sample, seed: u64) -> Self {
        self.spread_ms = spread_ms;
        self.seed = seed;
        self
    }
    /// The delay time of every channel, before clamping to the maximum.
    pub fn channel_times(&self) -> Vec<Sample> {
        let mut rng = fastrand::Rng::with_seed(self.seed);
        (0..self.channel_count)
            .map(|_| self.time_ms + rng.f32() * self.spread_ms)
            .collect()
    }
    #[allow(missing_docs)]
    pub fn to_parallel(&self) -> ParallelNodeObject<DelayNode> {
        let times = self.channel_times();
        let max_delay_ms = self.max_delay_ms;
        let (feedback, dry_wet) = (self.feedback, self.dry_wet);
        ParallelNodeObject::new(self.id.clone(), self.channel_count, move |nm, channel| {
            DelayNode::new(nm, max_delay_ms, times[channel])
        })
        .with_input("audio", 0)
        .with_configure(move |_, node| {
            node.set_feedback(feedback, 0.0);
            node.set_dry_wet(dry_wet, 0.0);
        })
    }
}
forward_audio_object!(DelayObject);

#[allow(missing_docs)]
pub type DelayInstance = ParallelNodeInstance<DelayNode>;

/// A [`LevelMeterNode`] per channel, registered as roots. Has inputs but no
/// output channels.
///
/// *inputs* "audio"
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct LevelMeterObject {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub channel_count: usize,
    #[allow(missing_docs)]
    pub meter_type: MeterType,
    #[allow(missing_docs)]
    pub window_ms: Sample,
}

impl LevelMeterObject {
    #[allow(missing_docs)]
    pub fn new(
        id: impl Into<String>,
        channel_count: usize,
        meter_type: MeterType,
        window_ms: Sample,
    ) -> Self {
        Self {
            id: id.into(),
            channel_count,
            meter_type,
            window_ms,
        }
    }
    #[allow(missing_docs)]
    pub fn to_parallel(&self) -> ParallelNodeObject<LevelMeterNode> {
        let (meter_type, window_ms) = (self.meter_type, self.window_ms);
        ParallelNodeObject::new(self.id.clone(), self.channel_count, move |_, _| {
            LevelMeterNode::new(meter_type, window_ms)
        })
        .with_input("audio", 0)
        .as_roots()
    }
}
forward_audio_object!(LevelMeterObject);

#[allow(missing_docs)]
pub type LevelMeterInstance = ParallelNodeInstance<LevelMeterNode>;

impl ParallelNodeInstance<LevelMeterNode> {
    /// The last completed reading of every channel.
    pub fn levels(&self) -> Vec<Sample> {
        self.nodes.iter().map(|node| node.get_level()).collect()
    }
}

/// A single [`EnvelopeNode`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvelopeObject {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub segments: Vec<Segment>,
}

impl EnvelopeObject {
    #[allow(missing_docs)]
    pub fn new(id: impl Into<String>, segments: Vec<Segment>) -> Self {
        Self {
            id: id.into(),
            segments,
        }
    }
    #[allow(missing_docs)]
    pub fn to_parallel(&self) -> ParallelNodeObject<EnvelopeNode> {
        let segments = self.segments.clone();
        ParallelNodeObject::new(self.id.clone(), 1, move |_, _| EnvelopeNode::new(&segments))
    }
}
forward_audio_object!(EnvelopeObject);

#[allow(missing_docs)]
pub type EnvelopeInstance = ParallelNodeInstance<EnvelopeNode>;

/// Routes each of its channels to a device output channel. The nodes are
/// registered as roots, so whatever is connected is pulled every period.
///
/// *inputs* "audio"
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputObject {
    #[allow(missing_docs)]
    pub id: String,
    /// Device channel of every input channel
    pub routing: Vec<usize>,
}

impl OutputObject {
    #[allow(missing_docs)]
    pub fn new(id: impl Into<String>, routing: Vec<usize>) -> Self {
        Self {
            id: id.into(),
            routing,
        }
    }
    /// Channel `i` to device channel `i`.
    pub fn stereo(id: impl Into<String>) -> Self {
        Self::new(id, vec![0, 1])
    }
    #[allow(missing_docs)]
    pub fn to_parallel(&self) -> ParallelNodeObject<OutputNode> {
        let routing = self.routing.clone();
        ParallelNodeObject::new(self.id.clone(), self.routing.len(), move |_, channel| {
            OutputNode::new(routing[channel])
        })
        .with_input("audio", 0)
        .as_roots()
    }
}
forward_audio_object!(OutputObject);

#[allow(missing_docs)]
pub type OutputInstance = ParallelNodeInstance<OutputNode>;

/// Reads device input channels.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct InputObject {
    #[allow(missing_docs)]
    pub id: String,
    /// Device channel of every output channel
    pub routing: Vec<usize>,
}

impl InputObject {
    #[allow(missing_docs)]
    pub fn new(id: impl Into<String>, routing: Vec<usize>) -> Self {
        Self {
            id: id.into(),
            routing,
        }
    }
    #[allow(missing_docs)]
    pub fn to_parallel(&self) -> ParallelNodeObject<InputNode> {
        let routing = self.routing.clone();
        ParallelNodeObject::new(self.id.clone(), self.routing.len(), move |_, channel| {
            InputNode::new(routing[channel])
        })
    }
}
forward_audio_object!(InputObject);

#[allow(missing_docs)]
pub type InputInstance = ParallelNodeInstance<InputNode>;
