use parking_lot::{Condvar, Mutex};

/// A counting barrier. The waiting side sets the number of notifications it
/// expects and sleeps until that many have arrived.
#[derive(Debug, Default)]
pub struct AsyncObserver {
    remaining: Mutex<usize>,
    condvar: Condvar,
}

impl AsyncObserver {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }
    /// Expect `count` calls to [`Self::notify_barrier`].
    pub fn set_barrier(&self, count: usize) {
        *self.remaining.lock() = count;
    }
    /// Count one completion. Extra notifications are ignored.
    pub fn notify_barrier(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.condvar.notify_all();
        }
    }
    /// Block until every expected notification has arrived.
    pub fn wait_for_notifications(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.condvar.wait(&mut remaining);
        }
    }
    /// The number of notifications still expected.
    pub fn remaining(&self) -> usize {
        *self.remaining.lock()
    }
}
