//! Ready made [`Node`](crate::node::Node)s.
//!
//! Every node treats an unconnected input as silence. Parameters that can be
//! changed while the node is live are reached through the node's controls,
//! which are safe to use from any thread.

mod control;
mod delay;
mod envelope;
mod filter;
mod gain;
mod io;
mod level_meter;
mod mix;

pub use control::{ControlHandle, ControlNode};
pub use delay::{DelayHandle, DelayNode};
pub use envelope::{EnvelopeHandle, EnvelopeNode, Segment, MAX_SEGMENTS};
pub use filter::{FilterHandle, FilterMode, FilterNode};
pub use gain::{GainHandle, GainNode};
pub use io::{InputNode, OutputNode};
pub use level_meter::{LevelMeterHandle, LevelMeterNode, MeterType};
pub use mix::MixNode;
