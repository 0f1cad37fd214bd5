//! Connection points on nodes.

use crate::node_manager::NodeKey;
use crate::Sample;

/// An output of a node. Connect it to any number of [`InputPin`]s.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutputPin {
    pub(crate) node: NodeKey,
    pub(crate) index: usize,
}

impl OutputPin {
    #[allow(missing_docs)]
    pub fn new(node: NodeKey, index: usize) -> Self {
        Self { node, index }
    }
    /// The node this pin belongs to.
    pub fn node(&self) -> NodeKey {
        self.node
    }
    #[allow(missing_docs)]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// An input of a node. Zero, one or many [`OutputPin`]s can be connected to it,
/// multiple connections are summed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct InputPin {
    pub(crate) node: NodeKey,
    pub(crate) index: usize,
}

impl InputPin {
    #[allow(missing_docs)]
    pub fn new(node: NodeKey, index: usize) -> Self {
        Self { node, index }
    }
    /// The node this pin belongs to.
    pub fn node(&self) -> NodeKey {
        self.node
    }
    #[allow(missing_docs)]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Connections of one input and the buffer they are summed into when there is more than one.
#[derive(Debug, Clone)]
pub(crate) struct InputPinState {
    pub(crate) connections: Vec<OutputPin>,
    pub(crate) scratch: Vec<Sample>,
}

impl InputPinState {
    /// Enough room that connecting a handful of voices never reallocates.
    const CONNECTION_CAPACITY: usize = 8;

    pub(crate) fn new(buffer_size: usize) -> Self {
        Self {
            connections: Vec::with_capacity(Self::CONNECTION_CAPACITY),
            scratch: vec![0.0; buffer_size],
        }
    }
}
