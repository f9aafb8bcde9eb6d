//! Sleepable RCU domain.

use kernsim_core::{SimError, SimResult};
use parking_lot::Mutex;
use std::time::Duration;

/// Maximum concurrent readers per domain.
pub const SRCU_MAX_READERS: usize = 32;

/// Poll interval while `synchronize` waits for old readers.
const SYNC_POLL_US: u64 = 1;

struct SrcuInner {
    /// Generation index, 0 or 1.
    current: usize,
    completed: u64,
    /// Per-slot reader marks: 0 when free, otherwise `idx + 1` for the
    /// generation index the reader entered with.
    readers: [usize; SRCU_MAX_READERS],
}

/// An SRCU domain.
///
/// Read-side critical sections may sleep. `synchronize` waits for every
/// reader that entered under the old generation index; the old index is
/// saved before the flip, so readers arriving under the new index never
/// delay it.
pub struct SrcuDomain {
    inner: Mutex<SrcuInner>,
    /// Serializes concurrent `synchronize` callers.
    sync_lock: Mutex<()>,
}

impl Default for SrcuDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl SrcuDomain {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SrcuInner {
                current: 0,
                completed: 0,
                readers: [0; SRCU_MAX_READERS],
            }),
            sync_lock: Mutex::new(()),
        }
    }

    /// Enter a read-side critical section on a caller-chosen slot.
    /// Returns the generation index to pass back to [`read_unlock`].
    pub fn read_lock(&self, slot: usize) -> SimResult<usize> {
        if slot >= SRCU_MAX_READERS {
            return Err(SimError::invalid(format!(
                "srcu slot {slot} out of range 0..{SRCU_MAX_READERS}"
            )));
        }
        let mut inner = self.inner.lock();
        if inner.readers[slot] != 0 {
            return Err(SimError::StateViolation {
                operation: "srcu read_lock",
                state: format!("slot {slot} already held"),
            });
        }
        let idx = inner.current;
        inner.readers[slot] = idx + 1;
        Ok(idx)
    }

    /// Enter a read-side critical section on any free slot.
    /// Fails with `CapacityExceeded` while all slots are held.
    pub fn read_lock_any(&self) -> SimResult<(usize, usize)> {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.readers.iter().position(|&r| r == 0) else {
            return Err(SimError::CapacityExceeded {
                resource: "srcu reader slots",
                limit: SRCU_MAX_READERS,
            });
        };
        let idx = inner.current;
        inner.readers[slot] = idx + 1;
        Ok((slot, idx))
    }

    /// Leave a read-side critical section. Clears the slot only if it still
    /// carries the index the reader entered with.
    pub fn read_unlock(&self, slot: usize, idx: usize) -> SimResult<()> {
        if slot >= SRCU_MAX_READERS {
            return Err(SimError::invalid(format!(
                "srcu slot {slot} out of range 0..{SRCU_MAX_READERS}"
            )));
        }
        let mut inner = self.inner.lock();
        if inner.readers[slot] != idx + 1 {
            return Err(SimError::StateViolation {
                operation: "srcu read_unlock",
                state: format!("slot {slot} does not hold index {idx}"),
            });
        }
        inner.readers[slot] = 0;
        Ok(())
    }

    /// Wait for all readers that entered under the current generation.
    ///
    /// Saves the pre-flip index, flips `current`, bumps `completed`, then
    /// polls until no slot still carries the old index. Every read-side
    /// section that observed the old index completes before this returns.
    pub fn synchronize(&self) {
        let _serialized = self.sync_lock.lock();

        let old = {
            let mut inner = self.inner.lock();
            let old = inner.current;
            inner.current ^= 1;
            inner.completed += 1;
            old
        };

        loop {
            {
                let inner = self.inner.lock();
                if inner.readers.iter().all(|&r| r != old + 1) {
                    return;
                }
            }
            std::thread::sleep(Duration::from_micros(SYNC_POLL_US));
        }
    }

    pub fn current_index(&self) -> usize {
        self.inner.lock().current
    }

    pub fn completed(&self) -> u64 {
        self.inner.lock().completed
    }

    pub fn active_readers(&self) -> usize {
        self.inner.lock().readers.iter().filter(|&&r| r != 0).count()
    }
}
