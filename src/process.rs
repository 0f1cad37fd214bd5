//! Units of work that can run in parallel.
//!
//! A [`ParentProcess`] is a node that owns child [`Process`]es. Every period
//! it hands each child to a shared [`ThreadPool`], waits on an
//! [`AsyncObserver`] until all of them have signalled completion and then sums
//! their outputs in child order. A child can own an entire graph of its own,
//! see [`NestedGraph`].
//!
//! A child that returns an error is silent for that period. A child that
//! panics is disabled and silent from then on. Both are reported on the
//! parent's diagnostics channel, see [`ParentHandle::failures`].

mod nested;
mod observer;
mod parent;
mod thread_pool;

pub use nested::NestedGraph;
pub use observer::AsyncObserver;
pub use parent::{
    ChildFailure, ChildFailureKind, ParentHandle, ParentProcess, ParentProcessSettings,
    ProcessMode,
};
pub use thread_pool::{ThreadPool, ThreadPoolSettings};

use crate::Sample;

/// Something that produces a fixed number of channels of audio per period.
pub trait Process: Send + 'static {
    /// The number of output channels. Must not change.
    fn channel_count(&self) -> usize;
    /// Fill `outputs`, one buffer per channel. The buffers hold the previous
    /// period's output.
    fn process(&mut self, outputs: &mut [Vec<Sample>]) -> Result<(), ProcessError>;
    /// A label used in diagnostics.
    fn name(&self) -> &'static str {
        "process"
    }
    #[allow(unused)]
    #[allow(missing_docs)]
    fn sample_rate_changed(&mut self, sample_rate: Sample) {}
    #[allow(unused)]
    #[allow(missing_docs)]
    fn buffer_size_changed(&mut self, buffer_size: usize) {}
}

/// Error in a [`Process`] or when adding one to a parent.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// Returned by a child process that couldn't produce output this period.
    #[error("The process failed: {0}")]
    Failed(String),
    #[allow(missing_docs)]
    #[error("Child process \"{name}\" has {found} channels, the parent has {expected}")]
    ChannelCountMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Error creating or using a [`ThreadPool`].
#[derive(thiserror::Error, Debug)]
pub enum ThreadPoolError {
    #[allow(missing_docs)]
    #[error("Failed to spawn a worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[allow(missing_docs)]
    #[error("The thread pool has shut down")]
    ShutDown,
}
