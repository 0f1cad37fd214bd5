//! # Tonverk - a real time audio node graph
//!
//! Tonverk runs a graph of DSP [`Node`](node::Node)s on an audio callback
//! while other threads add, remove and reconfigure parts of the live graph.
//!
//! ## Architecture
//!
//! The [`NodeManager`](node_manager::NodeManager) owns the graph. Once per
//! audio period it pulls every registered root node, which transitively
//! processes each node it depends on exactly once. Control threads change the
//! graph through the same lock the audio callback holds for the duration of a
//! period, so changes are always applied between periods.
//!
//! Nodes are moved into the graph with
//! [`NodeManager::make_safe`](node_manager::NodeManager::make_safe), which
//! returns a move-only [`SafeOwner`](node_manager::SafeOwner). Dropping it does
//! not free the node: the node is handed to a trash bin that the audio thread
//! drains at the end of its next period.
//!
//! Parameters change without clicks through [`RampedValue`](ramped_value::RampedValue)s,
//! and values computed on the audio thread (e.g. meter readings) are handed to
//! control threads through atomics and a [`DirtyFlag`](dirty_flag::DirtyFlag).
//!
//! On top of the graph sits an [`object`] layer of descriptions that
//! instantiate multichannel sub-graphs, including a polyphonic voice pool, and
//! a [`process`] layer that runs independent sub-graphs on a thread pool.
//!
//! ## Features
//!
//! - *serde-derive*: Settings and plain data descriptions can be
//!   serialized/deserialized using serde.
//! - *assert-no-alloc*: Panic when an audio period allocates (debug build
//!   only). Freeing reclaimed nodes is permitted.
//!
#![deny(rustdoc::broken_intra_doc_links)] // error if there are broken intra-doc links
#![warn(missing_docs)]

#[cfg(all(feature = "assert-no-alloc", debug_assertions))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

pub mod dirty_flag;
pub mod node;
pub mod node_manager;
pub mod nodes;
pub mod object;
pub mod prelude;
pub mod process;
pub mod ramped_value;
mod sync;

/// The sample type used throughout the graph.
pub type Sample = f32;

/// Any error returned by this crate.
#[derive(thiserror::Error, Debug)]
pub enum TonverkError {
    #[allow(missing_docs)]
    #[error("There was an error adding or removing connections between nodes: {0}")]
    Connection(#[from] node_manager::ConnectionError),
    #[allow(missing_docs)]
    #[error("There was an error instantiating an audio object: {0}")]
    Object(#[from] object::ObjectError),
    #[allow(missing_docs)]
    #[error("Instantiation failed: {0}")]
    Instantiation(#[from] object::InstantiationError),
    #[allow(missing_docs)]
    #[error("There was an error in a process: {0}")]
    Process(#[from] process::ProcessError),
    #[allow(missing_docs)]
    #[error("There was an error with the thread pool: {0}")]
    ThreadPool(#[from] process::ThreadPoolError),
}

/// Convert decibels to linear amplitude.
#[must_use]
pub fn db_to_amplitude(db: f32) -> f32 {
    10.0_f32.powf(db / 20.)
}
/// Convert linear amplitude to decibels.
#[must_use]
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    20.0 * amplitude.log10()
}
