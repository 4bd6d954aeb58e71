// SPDX-License-Identifier: Unlicense

//! Wrapper for locking and releasing a mutex through a local variable.

use spin::{Mutex, MutexGuard};

/// Wraps a generic object in a Mutex.
#[derive(Debug, Default)]
pub struct Locked<A> {
    inner: Mutex<A>,
}

impl<A> Locked<A> {
    /// Create a Mutex wrapping an object.
    pub const fn new(inner: A) -> Self {
        Locked {
            inner: Mutex::new(inner),
        }
    }

    /// Hold the lock on the Mutex while local variable is live.
    ///
    /// NOTE: Never hold across a call into a vectored handler; handlers
    /// re-enter the structures guarded here.
    pub fn lock(&self) -> MutexGuard<A> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let locked = Locked::new(vec![1u32]);
        locked.lock().push(2);
        {
            let guard = locked.lock();
            assert_eq!(*guard, vec![1, 2]);
        }
        locked.lock().clear();
        assert!(locked.lock().is_empty());
    }
}
