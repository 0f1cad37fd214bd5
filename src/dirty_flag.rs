//! A single bit handoff between one writing and one reading thread.
//!
//! The writer publishes some value through its own atomics and then calls
//! [`DirtyFlag::set`]. The reader calls [`DirtyFlag::check`], which clears the
//! flag and, if it was set, guarantees that everything written before `set`
//! is visible. Used in both directions: the audio thread publishing meter
//! readings to the control thread, and the control thread asking the audio
//! thread to recompute filter coefficients.

use crate::sync::{AtomicBool, Ordering};

/// See the [module level docs](self).
#[derive(Debug)]
pub struct DirtyFlag {
    dirty: AtomicBool,
}

impl DirtyFlag {
    /// A clean flag.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dirty: AtomicBool::new(false),
        }
    }
    /// Mark as dirty. Pairs with the `Acquire` in [`DirtyFlag::check`].
    #[inline]
    pub fn set(&self) {
        self.dirty.store(true, Ordering::Release);
    }
    /// Returns true if the flag was dirty and clears it in the same operation.
    #[inline]
    pub fn check(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
    /// Look at the flag without clearing it.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

impl Default for DirtyFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::DirtyFlag;

    #[test]
    fn check_clears() {
        let flag = DirtyFlag::new();
        assert!(!flag.check());
        flag.set();
        assert!(flag.is_dirty());
        assert!(flag.check());
        assert!(!flag.check());
        assert!(!flag.is_dirty());
    }

    #[test]
    fn setting_twice_is_one_notification() {
        let flag = DirtyFlag::default();
        flag.set();
        flag.set();
        assert!(flag.check());
        assert!(!flag.check());
    }
}
