//! Manual-reset stop signal shared between a component and its background
//! thread.
//!
//! The gate starts halted: a freshly constructed subscriber does nothing
//! until `Start()` resumes it. The background read loop checks the gate at
//! the top of every iteration and exits once it observes the halt; there
//! is no forced interrupt of an in-flight blocking call.

use std::sync::atomic::{AtomicBool, Ordering};

/// Manual-reset stop flag.
#[derive(Debug)]
pub struct Gate {
    halted: AtomicBool,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Create a gate in the halted state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            halted: AtomicBool::new(true),
        }
    }

    /// Signal the background loop to stop. Idempotent.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Clear the stop signal so a loop may run.
    pub fn resume(&self) {
        self.halted.store(false, Ordering::SeqCst);
    }

    /// Check the stop signal without blocking.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}
