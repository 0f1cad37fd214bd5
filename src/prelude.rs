pub use crate::dirty_flag::DirtyFlag;
pub use crate::node::{Node, NodeEvent, NodeEventKind, ProcessContext};
pub use crate::node_manager::{
    Clock, ConnectionError, Graph, GraphGuard, InputPin, NodeKey, NodeManager,
    NodeManagerSettings, OutputPin, SafeOwner, SafePtr,
};
pub use crate::nodes::*;
pub use crate::object::{
    instantiate, AudioObject, AudioObjectInstance, Chain, ChainInstance, ControlInstance,
    ControlObject, DelayInstance, DelayObject, EnvelopeInstance, EnvelopeObject, ErrorState,
    FilterInstance, FilterObject, GainInstance, GainObject, GraphInstance, GraphObject,
    InputInstance, InputObject, LevelMeterInstance, LevelMeterObject, MixerInstance, MixerObject,
    ObjectError, OutputInstance, OutputObject, PolyphonicInstance, PolyphonicObject,
    VoiceInstance, VoiceObject,
};
pub use crate::process::{NestedGraph, Process, ProcessError};
pub use crate::ramped_value::{RampHandle, RampMode, RampedValue};
pub use crate::{Sample, TonverkError};
