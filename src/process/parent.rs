use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use super::thread_pool::{self, Message};
use super::{AsyncObserver, Process, ProcessError, ThreadPool};
use crate::node::{Node, ProcessContext};
use crate::node_manager::NodeManager;
use crate::Sample;

/// How a [`ParentProcess`] runs its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub enum ProcessMode {
    /// On the thread pool, waiting for all children before mixing
    #[default]
    Parallel,
    /// One after the other on the audio thread
    Sequential,
}

impl ProcessMode {
    fn to_u8(self) -> u8 {
        match self {
            ProcessMode::Parallel => 0,
            ProcessMode::Sequential => 1,
        }
    }
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ProcessMode::Sequential,
            _ => ProcessMode::Parallel,
        }
    }
}

/// Settings for a [`ParentProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct ParentProcessSettings {
    /// Every child must have this many channels.
    pub channel_count: usize,
    #[allow(missing_docs)]
    pub mode: ProcessMode,
    /// Failures beyond this many unread reports are dropped.
    pub diagnostics_capacity: usize,
}

impl Default for ParentProcessSettings {
    fn default() -> Self {
        Self {
            channel_count: 2,
            mode: ProcessMode::Parallel,
            diagnostics_capacity: 64,
        }
    }
}

/// What went wrong in a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildFailureKind {
    /// The child returned an error and was silent for one period.
    Error(ProcessError),
    /// The child panicked and has been disabled.
    Panicked(String),
}

/// A report from the diagnostics channel of a [`ParentProcess`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildFailure {
    /// Index of the child in the order it was added
    pub child: usize,
    #[allow(missing_docs)]
    pub name: &'static str,
    #[allow(missing_docs)]
    pub kind: ChildFailureKind,
}

struct ChildState {
    process: Box<dyn Process>,
    outputs: Vec<Vec<Sample>>,
}

pub(crate) struct ChildSlot {
    index: usize,
    name: &'static str,
    state: Mutex<ChildState>,
    disabled: AtomicBool,
}

impl ChildSlot {
    fn run(&self, failures: &Sender<ChildFailure>) {
        let mut state = self.state.lock();
        let ChildState { process, outputs } = &mut *state;
        if self.disabled.load(Ordering::Relaxed) {
            silence(outputs);
            return;
        }
        let kind = match catch_unwind(AssertUnwindSafe(|| process.process(outputs))) {
            Ok(Ok(())) => return,
            Ok(Err(error)) => ChildFailureKind::Error(error),
            Err(payload) => {
                self.disabled.store(true, Ordering::Relaxed);
                ChildFailureKind::Panicked(panic_message(payload.as_ref()))
            }
        };
        silence(outputs);
        // Dropped if nobody reads the reports
        let _ = failures.try_send(ChildFailure {
            child: self.index,
            name: self.name,
            kind,
        });
    }
}

fn silence(outputs: &mut [Vec<Sample>]) {
    for output in outputs {
        output.fill(0.0);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One child's share of a period, sent to a worker.
pub(crate) struct ChildJob {
    child: Arc<ChildSlot>,
    observer: Arc<AsyncObserver>,
    failures: Sender<ChildFailure>,
}

impl ChildJob {
    /// Always notifies the observer, however the child fares.
    pub(crate) fn run(self) {
        self.child.run(&self.failures);
        self.observer.notify_barrier();
    }
}

#[derive(Debug)]
struct ParentShared {
    mode: AtomicU8,
}

/// Controls of a [`ParentProcess`].
#[derive(Debug, Clone)]
pub struct ParentHandle {
    shared: Arc<ParentShared>,
    failures: Receiver<ChildFailure>,
}

impl ParentHandle {
    /// Takes effect from the next period.
    pub fn set_mode(&self, mode: ProcessMode) {
        self.shared.mode.store(mode.to_u8(), Ordering::Relaxed);
    }
    #[allow(missing_docs)]
    pub fn mode(&self) -> ProcessMode {
        ProcessMode::from_u8(self.shared.mode.load(Ordering::Relaxed))
    }
    /// The diagnostics channel. Reports are sent from the audio thread or a
    /// worker, never more than one per child per period.
    pub fn failures(&self) -> &Receiver<ChildFailure> {
        &self.failures
    }
}

/// A node that runs child [`Process`]es, in parallel on a [`ThreadPool`] or in
/// sequence, and outputs the sum of their outputs.
///
/// ```
/// use std::sync::Arc;
/// use tonverk::prelude::*;
/// use tonverk::process::{ParentProcess, ParentProcessSettings, ThreadPool, ThreadPoolSettings};
///
/// let node_manager = NodeManager::new(NodeManagerSettings::default());
/// let pool = Arc::new(ThreadPool::new(ThreadPoolSettings::default())?);
/// let mut parent = ParentProcess::new(&node_manager, pool, ParentProcessSettings::default());
/// let nested = NestedGraph::new(&node_manager, 2);
/// parent.add_child(nested)?;
/// let parent = node_manager.make_safe(parent);
/// # Ok::<(), tonverk::TonverkError>(())
/// ```
pub struct ParentProcess {
    children: Vec<Arc<ChildSlot>>,
    pool: Arc<ThreadPool>,
    observer: Arc<AsyncObserver>,
    shared: Arc<ParentShared>,
    failure_sender: Sender<ChildFailure>,
    failure_receiver: Receiver<ChildFailure>,
    channel_count: usize,
    sample_rate: Sample,
    buffer_size: usize,
}

impl ParentProcess {
    #[allow(missing_docs)]
    pub fn new(
        node_manager: &NodeManager,
        pool: Arc<ThreadPool>,
        settings: ParentProcessSettings,
    ) -> Self {
        let (failure_sender, failure_receiver) = bounded(settings.diagnostics_capacity.max(1));
        Self {
            children: Vec::new(),
            pool,
            observer: Arc::new(AsyncObserver::new()),
            shared: Arc::new(ParentShared {
                mode: AtomicU8::new(settings.mode.to_u8()),
            }),
            failure_sender,
            failure_receiver,
            channel_count: settings.channel_count,
            sample_rate: node_manager.sample_rate(),
            buffer_size: node_manager.internal_buffer_size(),
        }
    }

    /// Add a child, returning its index. Once the parent is in a graph, call
    /// this through [`SafePtr::with_node`](crate::node_manager::SafePtr::with_node).
    ///
    /// *Allocates memory*
    pub fn add_child(&mut self, mut child: impl Process) -> Result<usize, ProcessError> {
        let name = child.name();
        let found = child.channel_count();
        if found != self.channel_count {
            return Err(ProcessError::ChannelCountMismatch {
                name,
                expected: self.channel_count,
                found,
            });
        }
        child.sample_rate_changed(self.sample_rate);
        child.buffer_size_changed(self.buffer_size);
        let index = self.children.len();
        self.children.push(Arc::new(ChildSlot {
            index,
            name,
            state: Mutex::new(ChildState {
                process: Box::new(child),
                outputs: vec![vec![0.0; self.buffer_size]; self.channel_count],
            }),
            disabled: AtomicBool::new(false),
        }));
        tracing::debug!(child = name, index, "Added child process");
        Ok(index)
    }

    #[allow(missing_docs)]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// True if the child panicked and no longer runs.
    pub fn is_child_disabled(&self, index: usize) -> bool {
        self.children
            .get(index)
            .is_some_and(|child| child.disabled.load(Ordering::Relaxed))
    }

    fn run_children(&mut self) {
        let mode = ProcessMode::from_u8(self.shared.mode.load(Ordering::Relaxed));
        // A worker waiting on a barrier can't help drain the queue it waits on
        if mode == ProcessMode::Sequential
            || self.children.len() < 2
            || thread_pool::on_worker_thread()
        {
            for child in &self.children {
                child.run(&self.failure_sender);
            }
            return;
        }
        self.observer.set_barrier(self.children.len());
        for child in &self.children {
            let job = ChildJob {
                child: child.clone(),
                observer: self.observer.clone(),
                failures: self.failure_sender.clone(),
            };
            if let Err(Message::Run(job)) = self.pool.try_send(Message::Run(job)) {
                job.run();
            }
        }
        self.observer.wait_for_notifications();
    }
}

impl Node for ParentProcess {
    type Controls = ParentHandle;

    fn controls(&self) -> Self::Controls {
        ParentHandle {
            shared: self.shared.clone(),
            failures: self.failure_receiver.clone(),
        }
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        self.run_children();
        ctx.clear_outputs();
        for child in &self.children {
            let state = child.state.lock();
            for (channel, buffer) in state.outputs.iter().enumerate() {
                for (out, sample) in ctx.output(channel).iter_mut().zip(buffer) {
                    *out += *sample;
                }
            }
        }
    }
    fn num_inputs(&self) -> usize {
        0
    }
    fn num_outputs(&self) -> usize {
        self.channel_count
    }
    fn name(&self) -> &'static str {
        "ParentProcess"
    }
    fn sample_rate_changed(&mut self, sample_rate: Sample) {
        self.sample_rate = sample_rate;
        for child in &self.children {
            child.state.lock().process.sample_rate_changed(sample_rate);
        }
    }
    fn buffer_size_changed(&mut self, buffer_size: usize) {
        self.buffer_size = buffer_size;
        for child in &self.children {
            let mut state = child.state.lock();
            for output in &mut state.outputs {
                output.resize(buffer_size, 0.0);
            }
            state.process.buffer_size_changed(buffer_size);
        }
    }
}
