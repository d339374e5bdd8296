//! Subscription lifecycle state shared across threads.
//!
//! The lifecycle is read on every raw event and on every timer expiry, from
//! whichever thread the native source or runtime happens to use, so it is
//! kept in a lock-free cell rather than behind the subscription's mutex.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use serde::Serialize;

/// Lifecycle state of a subscription.
///
/// `Stopped` is terminal: no transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Lifecycle {
    /// Events are accepted and delivered.
    Active,
    /// Events are dropped; the native source is disabled but allocated.
    Suspended,
    /// Resources are released; nothing is delivered ever again.
    Stopped,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Suspended,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Suspended => 1,
            Self::Stopped => 2,
        }
    }
}

impl Display for Lifecycle {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared, atomically updated lifecycle.
///
/// Clones observe the same state.
#[derive(Debug, Clone)]
pub struct LifecycleCell {
    state: Arc<AtomicU8>,
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new(Lifecycle::Active)
    }
}

impl LifecycleCell {
    /// Creates a cell holding `initial`.
    pub fn new(initial: Lifecycle) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(initial.as_u8())),
        }
    }

    /// Current state.
    pub fn get(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether events are currently accepted.
    pub fn is_active(&self) -> bool {
        self.get() == Lifecycle::Active
    }

    /// Whether the subscription has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.get() == Lifecycle::Stopped
    }

    /// Moves from `from` to `to`.
    ///
    /// # Returns
    ///
    /// `true` if the cell held `from` and now holds `to`; `false` if it held
    /// anything else, in which case it is left untouched.
    pub fn transition(&self, from: Lifecycle, to: Lifecycle) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves to `Stopped` from any state.
    ///
    /// # Returns
    ///
    /// The state held before, so callers can tell a first stop from a repeat.
    pub fn stop(&self) -> Lifecycle {
        Lifecycle::from_u8(
            self.state
                .swap(Lifecycle::Stopped.as_u8(), Ordering::AcqRel),
        )
    }
}
