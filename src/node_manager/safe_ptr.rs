//! Ownership of nodes living in a [`NodeManager`].
//!
//! [`NodeManager::make_safe`] moves a node into the graph and returns the one
//! [`SafeOwner`] for it. Dropping the owner hands the node to the trash bin;
//! the node is reclaimed by the audio thread at the end of the next period it
//! runs, so a release never waits for the audio thread and never frees memory
//! that a pull in progress might read. [`SafePtr`]s are non-owning and stop
//! resolving once the node has been reclaimed.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

use super::pin::{InputPin, OutputPin};
use super::{NodeKey, NodeManager};
use crate::node::Node;

/// A non-owning reference to a node of type `T`.
///
/// Derefs to the node's [`Node::Controls`].
pub struct SafePtr<T: Node> {
    key: NodeKey,
    manager: NodeManager,
    controls: T::Controls,
    _node: PhantomData<fn() -> T>,
}

impl<T: Node> Clone for SafePtr<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            manager: self.manager.clone(),
            controls: self.controls.clone(),
            _node: PhantomData,
        }
    }
}

impl<T: Node> fmt::Debug for SafePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafePtr")
            .field("key", &self.key)
            .field("node", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: Node> SafePtr<T> {
    /// The key of the node in its graph.
    pub fn key(&self) -> NodeKey {
        self.key
    }
    /// Output pin `index` of the node. The index is checked when connecting.
    pub fn output(&self, index: usize) -> OutputPin {
        OutputPin::new(self.key, index)
    }
    /// Input pin `index` of the node. The index is checked when connecting.
    pub fn input(&self, index: usize) -> InputPin {
        InputPin::new(self.key, index)
    }
    /// The control side state of the node.
    pub fn controls(&self) -> &T::Controls {
        &self.controls
    }
    /// The manager whose graph the node lives in.
    pub fn node_manager(&self) -> &NodeManager {
        &self.manager
    }
    /// False once the node has been reclaimed. Takes the processing lock.
    pub fn is_alive(&self) -> bool {
        self.manager.lock().contains(self.key)
    }
    /// Run `f` on the node with the processing lock held. `None` if the node
    /// has been reclaimed.
    pub fn with_node<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.manager.with_node(self.key, f)
    }
}

impl<T: Node> Deref for SafePtr<T> {
    type Target = T::Controls;

    fn deref(&self) -> &Self::Target {
        &self.controls
    }
}

/// The owner of a node in a [`NodeManager`]. Move only, releases the node
/// through the trash bin when dropped.
///
/// Derefs to a [`SafePtr`], and from there to the node's [`Node::Controls`].
pub struct SafeOwner<T: Node> {
    ptr: SafePtr<T>,
}

impl<T: Node> SafeOwner<T> {
    pub(crate) fn new(key: NodeKey, manager: NodeManager, controls: T::Controls) -> Self {
        Self {
            ptr: SafePtr {
                key,
                manager,
                controls,
                _node: PhantomData,
            },
        }
    }
    /// A non-owning pointer to the same node.
    pub fn get(&self) -> SafePtr<T> {
        self.ptr.clone()
    }
}

impl<T: Node> Deref for SafeOwner<T> {
    type Target = SafePtr<T>;

    fn deref(&self) -> &Self::Target {
        &self.ptr
    }
}

impl<T: Node> fmt::Debug for SafeOwner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SafeOwner").field(&self.ptr).finish()
    }
}

impl<T: Node> Drop for SafeOwner<T> {
    fn drop(&mut self) {
        // Can run on the audio thread, e.g. in an event handler
        self.ptr.manager.dispose(self.ptr.key);
    }
}
