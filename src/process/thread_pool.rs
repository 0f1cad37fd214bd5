//! Persistent worker threads.
//!
//! Workers are created once and fed through a bounded channel. Dispatching a
//! child process job moves three reference counted handles through the
//! channel, so the audio thread can dispatch without allocating. When the
//! queue is full the job is handed back to the caller to run inline.
//!
//! A parent running on a worker never waits for the pool, it runs its
//! children inline. Otherwise nested parents on a small pool could park every
//! worker on a barrier with the jobs they wait for still queued.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use super::parent::ChildJob;
use super::ThreadPoolError;

/// Settings for a [`ThreadPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct ThreadPoolSettings {
    /// At least one worker is always started.
    pub thread_count: usize,
    /// The number of jobs that can wait for a worker.
    pub queue_capacity: usize,
    /// Worker threads are called `{name}-{index}`.
    pub name: String,
}

impl Default for ThreadPoolSettings {
    fn default() -> Self {
        // Leave a core for the audio thread
        let thread_count = thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1).max(1))
            .unwrap_or(2);
        Self {
            thread_count,
            queue_capacity: 256,
            name: "tonverk-worker".to_string(),
        }
    }
}

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// True on the worker threads of any [`ThreadPool`].
pub(crate) fn on_worker_thread() -> bool {
    ON_WORKER.with(Cell::get)
}

pub(crate) enum Message {
    Run(ChildJob),
    Task(Box<dyn FnOnce() + Send>),
    Shutdown,
}

struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(id: usize, name: &str, receiver: Receiver<Message>) -> Result<Self, ThreadPoolError> {
        let thread = thread::Builder::new()
            .name(format!("{name}-{id}"))
            .spawn(move || Worker::run(id, receiver))?;
        Ok(Self {
            id,
            thread: Some(thread),
        })
    }

    fn run(id: usize, receiver: Receiver<Message>) {
        ON_WORKER.with(|flag| flag.set(true));
        tracing::trace!(worker = id, "Worker started");
        loop {
            match receiver.recv() {
                Ok(Message::Run(job)) => job.run(),
                Ok(Message::Task(task)) => {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        tracing::error!(worker = id, "Task panicked");
                    }
                }
                Ok(Message::Shutdown) | Err(_) => break,
            }
        }
        tracing::trace!(worker = id, "Worker stopped");
    }
}

/// A pool of named worker threads, shared by any number of
/// [`ParentProcess`](super::ParentProcess)es.
pub struct ThreadPool {
    sender: Sender<Message>,
    workers: Vec<Worker>,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("thread_count", &self.workers.len())
            .finish()
    }
}

impl ThreadPool {
    #[allow(missing_docs)]
    pub fn new(settings: ThreadPoolSettings) -> Result<Self, ThreadPoolError> {
        let thread_count = settings.thread_count.max(1);
        let (sender, receiver) = bounded(settings.queue_capacity.max(1));
        let mut pool = Self {
            sender,
            workers: Vec::with_capacity(thread_count),
        };
        for id in 0..thread_count {
            // Workers spawned so far are shut down when `pool` is dropped
            let worker = Worker::spawn(id, &settings.name, receiver.clone())?;
            pool.workers.push(worker);
        }
        tracing::debug!(thread_count, name = %settings.name, "Started thread pool");
        Ok(pool)
    }

    /// Run a task on a worker. Blocks while the queue is full.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<(), ThreadPoolError> {
        self.sender
            .send(Message::Task(Box::new(task)))
            .map_err(|_| ThreadPoolError::ShutDown)
    }

    /// Never blocks. Returns the message if the queue is full.
    pub(crate) fn try_send(&self, message: Message) -> Result<(), Message> {
        self.sender.try_send(message).map_err(|error| match error {
            TrySendError::Full(message) | TrySendError::Disconnected(message) => message,
        })
    }

    #[allow(missing_docs)]
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        for _ in 0..self.workers.len() {
            let _ = self.sender.send(Message::Shutdown);
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    tracing::error!(worker = worker.id, "Worker thread panicked");
                }
            }
        }
        tracing::debug!("Thread pool shut down");
    }
}
