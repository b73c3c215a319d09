//! Peripheral lifecycle contract
//!
//! Every manager implements [`Peripheral`] and keeps a [`Lifecycle`] inside
//! its registry lock. Operations issued in the wrong state fail with
//! [`Error::InvalidState`] before touching any hardware.

pub mod events;
pub mod machine;

pub use events::Event;
pub use machine::State;

use crate::error::{Error, Result};

/// Informational scheduling priority of a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Lifecycle operations shared by all managers
///
/// All methods take `&self`: managers guard their state with an internal
/// mutex so one instance can be shared between tasks.
pub trait Peripheral {
    /// Claim the hardware
    ///
    /// A failure moves the manager to [`State::Error`] until [`reset`].
    ///
    /// [`reset`]: Peripheral::reset
    fn initialize(&self) -> Result<()>;

    /// Re-apply the stored configuration
    fn configure(&self) -> Result<()>;

    /// Enable the data path
    fn start(&self) -> Result<()>;

    /// Halt all asynchronous activity
    fn stop(&self) -> Result<()>;

    /// Release every owned resource and return to [`State::Initialized`]
    fn reset(&self) -> Result<()>;

    /// Name used in log output
    fn name(&self) -> &'static str;

    /// Current lifecycle state
    fn state(&self) -> State;

    /// Scheduling priority
    fn priority(&self) -> Priority;

    /// Change the scheduling priority
    fn set_priority(&self, priority: Priority);

    /// Check if the manager is Initialized or Running
    fn is_initialized(&self) -> bool {
        self.state().is_ready()
    }

    /// Check if the manager is Running
    fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    /// Check if a lifecycle operation failed
    fn has_error(&self) -> bool {
        self.state().is_error()
    }
}

/// Lifecycle bookkeeping embedded in each manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Lifecycle {
    name: &'static str,
    state: State,
    priority: Priority,
}

impl Lifecycle {
    /// Fresh, uninitialized lifecycle
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            state: State::Uninitialized,
            priority: Priority::Normal,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    /// Validate an event without applying it
    pub fn check(&self, event: Event) -> Result<State> {
        self.state.transition(event).ok_or_else(|| {
            warn!("{}: {:?} rejected in {:?}", self.name, event, self.state);
            Error::InvalidState
        })
    }

    /// Apply an event
    pub fn apply(&mut self, event: Event) -> Result<State> {
        let next = self.check(event)?;
        if next != self.state {
            debug!("{}: {:?} -> {:?}", self.name, self.state, next);
        }
        self.state = next;
        Ok(next)
    }

    /// Record a failed lifecycle operation and pass the error through
    pub fn fail(&mut self, error: Error) -> Error {
        error!("{}: failed in {:?}: {}", self.name, self.state, error);
        self.state = State::Error;
        error
    }

    /// Require Initialized or Running
    pub fn require_ready(&self) -> Result<()> {
        if self.state.is_ready() {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    /// Require Running
    pub fn require_running(&self) -> Result<()> {
        if self.state == State::Running {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }
}

/// Implements the [`Peripheral`] accessors for a manager whose registry
/// lives in `self.inner` and carries a `lifecycle` field
macro_rules! lifecycle_accessors {
    () => {
        fn name(&self) -> &'static str {
            self.inner.lock(|inner| inner.borrow().lifecycle.name())
        }

        fn state(&self) -> $crate::lifecycle::State {
            self.inner.lock(|inner| inner.borrow().lifecycle.state())
        }

        fn priority(&self) -> $crate::lifecycle::Priority {
            self.inner.lock(|inner| inner.borrow().lifecycle.priority())
        }

        fn set_priority(&self, priority: $crate::lifecycle::Priority) {
            self.inner
                .lock(|inner| inner.borrow_mut().lifecycle.set_priority(priority))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_rejects_without_side_effect() {
        let mut lifecycle = Lifecycle::new("test");
        assert_eq!(lifecycle.apply(Event::Start), Err(Error::InvalidState));
        assert_eq!(lifecycle.state(), State::Uninitialized);
    }

    #[test]
    fn test_fail_enters_error() {
        let mut lifecycle = Lifecycle::new("test");
        lifecycle.apply(Event::Initialize).unwrap();
        let err = lifecycle.fail(Error::InvalidArgument);
        assert_eq!(err, Error::InvalidArgument);
        assert_eq!(lifecycle.state(), State::Error);
        assert_eq!(lifecycle.require_ready(), Err(Error::InvalidState));
        assert_eq!(lifecycle.apply(Event::Reset), Ok(State::Initialized));
    }

    #[test]
    fn test_priority_default() {
        let mut lifecycle = Lifecycle::new("test");
        assert_eq!(lifecycle.priority(), Priority::Normal);
        lifecycle.set_priority(Priority::Critical);
        assert!(lifecycle.priority() > Priority::High);
    }
}
