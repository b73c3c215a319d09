//! Peripheral lifecycle state machine
//!
//! Every manager moves through the same finite set of states. The table in
//! [`State::transition`] is the only place transitions are defined.

use super::events::Event;

/// Peripheral states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Constructed, nothing claimed
    #[default]
    Uninitialized,
    /// Bring-up in progress
    Initializing,
    /// Hardware claimed, resources may be configured
    Initialized,
    /// Data path active
    Running,
    /// A lifecycle operation failed; only reset leaves this state
    Error,
    /// Stopped after running
    Suspended,
}

impl State {
    /// Check if resources may be configured in this state
    pub fn is_ready(&self) -> bool {
        matches!(self, State::Initialized | State::Running)
    }

    /// Check if this is the error state
    pub fn is_error(&self) -> bool {
        matches!(self, State::Error)
    }

    /// Process an event and return the next state
    ///
    /// Returns `None` when the event is not valid in this state.
    pub fn transition(self, event: Event) -> Option<Self> {
        use Event::*;
        use State::*;

        match (self, event) {
            // Reset is accepted everywhere
            (_, Reset) => Some(Initialized),

            // Bring-up
            (Uninitialized, Initialize) => Some(Initializing),
            (Initializing, InitComplete) => Some(Initialized),

            // Configuration (managers owning a bus also accept it live)
            (Initialized, Configure) => Some(Initialized),
            (Running, Configure) => Some(Running),

            // Start / stop
            (Initialized, Start) => Some(Running),
            (Suspended, Start) => Some(Running),
            (Running, Stop) => Some(Suspended),

            // Failure of any lifecycle operation
            (_, Failed) => Some(Error),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bring_up() {
        let state = State::Uninitialized.transition(Event::Initialize);
        assert_eq!(state, Some(State::Initializing));
        let state = State::Initializing.transition(Event::InitComplete);
        assert_eq!(state, Some(State::Initialized));
    }

    #[test]
    fn test_start_stop_cycle() {
        let running = State::Initialized.transition(Event::Start);
        assert_eq!(running, Some(State::Running));

        let suspended = State::Running.transition(Event::Stop);
        assert_eq!(suspended, Some(State::Suspended));

        let resumed = State::Suspended.transition(Event::Start);
        assert_eq!(resumed, Some(State::Running));
    }

    #[test]
    fn test_reset_from_any_state() {
        let states = [
            State::Uninitialized,
            State::Initializing,
            State::Initialized,
            State::Running,
            State::Error,
            State::Suspended,
        ];

        for state in states {
            assert_eq!(state.transition(Event::Reset), Some(State::Initialized));
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(State::Uninitialized.transition(Event::Start), None);
        assert_eq!(State::Uninitialized.transition(Event::Configure), None);
        assert_eq!(State::Initialized.transition(Event::Initialize), None);
        assert_eq!(State::Initialized.transition(Event::Stop), None);
        assert_eq!(State::Error.transition(Event::Start), None);
        assert_eq!(State::Suspended.transition(Event::Configure), None);
    }

    #[test]
    fn test_failure_moves_to_error() {
        assert_eq!(State::Initializing.transition(Event::Failed), Some(State::Error));
        assert_eq!(State::Running.transition(Event::Failed), Some(State::Error));
    }

    #[test]
    fn test_ready_states() {
        assert!(State::Initialized.is_ready());
        assert!(State::Running.is_ready());
        assert!(!State::Suspended.is_ready());
        assert!(!State::Uninitialized.is_ready());
    }
}
