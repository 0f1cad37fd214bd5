//! Descriptions of multichannel sub-graphs and the live instances built from them.
//!
//! An [`AudioObject`] is an immutable description. Instantiating it against a
//! [`NodeManager`] creates and wires the nodes it describes and returns an
//! [`AudioObjectInstance`] that owns them. Dropping the instance releases
//! every node it owns.
//!
//! ```
//! use tonverk::prelude::*;
//!
//! let node_manager = NodeManager::new(NodeManagerSettings::default());
//! let graph = GraphObject::new("voice")
//!     .with_object(ControlObject::new("source", 2, 0.5))
//!     .with_object(GainObject::new("gain", 2, 0.5))
//!     .link("source", "gain")
//!     .with_output("gain");
//! let mut errors = ErrorState::new();
//! let voice = graph.instantiate(&node_manager, &mut errors).expect("valid description");
//! assert_eq!(voice.channel_count(), 2);
//! ```
//!
//! Failed instantiations report through an [`ErrorState`] and leave nothing
//! behind in the graph.

mod chain;
mod graph;
mod parallel;
mod polyphonic;

pub use chain::{Chain, ChainInstance};
pub use graph::{GraphInstance, GraphObject, Link, VoiceInstance, VoiceObject};
pub use parallel::{
    ControlInstance, ControlObject, DelayInstance, DelayObject, EnvelopeInstance, EnvelopeObject,
    FilterInstance, FilterObject, GainInstance, GainObject, InputInstance, InputObject,
    LevelMeterInstance, LevelMeterObject, MixerInstance, MixerObject, OutputInstance,
    OutputObject, ParallelNodeInstance, ParallelNodeObject,
};
pub use polyphonic::{PolyphonicInstance, PolyphonicObject};

use downcast_rs::{impl_downcast, Downcast};

use crate::node_manager::{ConnectionError, Graph, InputPin, NodeManager, OutputPin};

/// A description of a sub-graph.
pub trait AudioObject: Send + Sync {
    /// Identifies the object within its parent.
    fn id(&self) -> &str;
    /// Create the nodes of the object and wire them. On failure, push the
    /// reasons onto `errors` and return `None`.
    fn instantiate(
        &self,
        node_manager: &NodeManager,
        errors: &mut ErrorState,
    ) -> Option<Box<dyn AudioObjectInstance>>;
}

/// A live sub-graph with a fixed number of output channels and, optionally,
/// input channels.
pub trait AudioObjectInstance: Downcast + Send {
    /// The number of output channels.
    fn channel_count(&self) -> usize;
    /// # Panics
    /// If `channel` is not smaller than [`Self::channel_count`].
    fn output_for_channel(&self, channel: usize) -> OutputPin;
    /// The number of input channels, 0 if the object takes no input.
    fn input_channel_count(&self) -> usize {
        0
    }
    /// The default input of a channel.
    #[allow(unused)]
    fn input_for_channel(&self, channel: usize) -> Option<InputPin> {
        None
    }
    /// A named input of a channel. Objects with a single input may accept any name.
    #[allow(unused)]
    fn named_input(&self, name: &str, channel: usize) -> Option<InputPin> {
        None
    }
}
impl_downcast!(AudioObjectInstance);

/// Error in an object description, found while instantiating.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    #[allow(missing_docs)]
    #[error("{object}: missing resource \"{id}\"")]
    MissingResource { object: String, id: String },
    #[allow(missing_docs)]
    #[error("{object}: expected {expected} channels, \"{id}\" has {found}")]
    ChannelCountMismatch {
        object: String,
        id: String,
        expected: usize,
        found: usize,
    },
    #[allow(missing_docs)]
    #[error("{object}: a chain needs at least one object")]
    EmptyChain { object: String },
    #[allow(missing_docs)]
    #[error("{object}: \"{id}\" has no input \"{input}\"")]
    NoInputInterface {
        object: String,
        id: String,
        input: String,
    },
    #[allow(missing_docs)]
    #[error("{object}: {message}")]
    InvalidSetting { object: String, message: String },
    #[allow(missing_docs)]
    #[error("{object}: {source}")]
    Connection {
        object: String,
        #[source]
        source: ConnectionError,
    },
    /// A child object failed, its own errors are listed before this one.
    #[error("{object}: failed to instantiate \"{id}\"")]
    Failed { object: String, id: String },
}

/// The errors of one instantiation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", join_errors(.errors))]
pub struct InstantiationError {
    #[allow(missing_docs)]
    pub errors: Vec<ObjectError>,
}

fn join_errors(errors: &[ObjectError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collects the errors of an instantiation.
#[derive(Debug, Default, Clone)]
pub struct ErrorState {
    errors: Vec<ObjectError>,
}

impl ErrorState {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }
    #[allow(missing_docs)]
    pub fn push(&mut self, error: ObjectError) {
        self.errors.push(error);
    }
    /// Push the error if `condition` is false. Returns `condition`.
    pub fn check(&mut self, condition: bool, error: impl FnOnce() -> ObjectError) -> bool {
        if !condition {
            self.errors.push(error());
        }
        condition
    }
    #[allow(missing_docs)]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
    #[allow(missing_docs)]
    pub fn errors(&self) -> &[ObjectError] {
        &self.errors
    }
    /// Every error on its own line.
    pub fn to_message(&self) -> String {
        join_errors(&self.errors)
    }
    #[allow(missing_docs)]
    pub fn into_result(self) -> Result<(), InstantiationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(InstantiationError {
                errors: self.errors,
            })
        }
    }
}

/// Instantiate `object` and turn the outcome into a `Result`.
pub fn instantiate(
    object: &dyn AudioObject,
    node_manager: &NodeManager,
) -> Result<Box<dyn AudioObjectInstance>, InstantiationError> {
    let mut errors = ErrorState::new();
    if let Some(instance) = object.instantiate(node_manager, &mut errors) {
        if !errors.has_errors() {
            return Ok(instance);
        }
    }
    if !errors.has_errors() {
        errors.push(ObjectError::Failed {
            object: object.id().to_string(),
            id: object.id().to_string(),
        });
    }
    tracing::error!(
        object = object.id(),
        errors = %errors.to_message(),
        "Instantiation failed"
    );
    Err(InstantiationError {
        errors: errors.errors,
    })
}

/// Connect the outputs of `source` to an input of every channel of `target`.
/// Target channel `i` is fed by source channel `i % source.channel_count()`.
/// `input` selects a named input, `None` uses the default input.
pub fn connect_cyclic(
    graph: &mut Graph,
    source: &dyn AudioObjectInstance,
    target: &dyn AudioObjectInstance,
    input: Option<&str>,
) -> Result<(), CyclicConnectError> {
    let source_channels = source.channel_count();
    if source_channels == 0 {
        return Err(CyclicConnectError::NoOutputs);
    }
    let target_channels = target.input_channel_count();
    if target_channels == 0 {
        return Err(CyclicConnectError::NoInput);
    }
    for channel in 0..target_channels {
        let pin = match input {
            Some(name) => target.named_input(name, channel),
            None => target.input_for_channel(channel),
        }
        .ok_or(CyclicConnectError::NoInput)?;
        graph.connect(source.output_for_channel(channel % source_channels), pin)?;
    }
    Ok(())
}

/// Error returned by [`connect_cyclic`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CyclicConnectError {
    #[allow(missing_docs)]
    #[error("the source has no output channels")]
    NoOutputs,
    #[allow(missing_docs)]
    #[error("the target has no such input")]
    NoInput,
    #[allow(missing_docs)]
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl CyclicConnectError {
    /// Describe the error in terms of the objects involved.
    pub(crate) fn into_object_error(
        self,
        object: &str,
        source_id: &str,
        target_id: &str,
        input: Option<&str>,
    ) -> ObjectError {
        match self {
            CyclicConnectError::NoOutputs => ObjectError::InvalidSetting {
                object: object.to_string(),
                message: format!("\"{source_id}\" has no output channels"),
            },
            CyclicConnectError::NoInput => ObjectError::NoInputInterface {
                object: object.to_string(),
                id: target_id.to_string(),
                input: input.unwrap_or("default").to_string(),
            },
            CyclicConnectError::Connection(source) => ObjectError::Connection {
                object: object.to_string(),
                source,
            },
        }
    }
}
