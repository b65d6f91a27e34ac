//! Session state management

use std::time::Instant;

/// Session lifecycle
///
/// A session runs once. `Ended`, `Failed` and `Closed` are terminal: nothing
/// leaves them except the move to `Closed` that releases resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, source not opened yet
    Idle,

    /// Decode thread is running
    Running {
        /// When the decode thread was started
        started_at: Instant,
    },

    /// Input exhausted
    Ended,

    /// Unrecoverable read or allocation failure
    Failed,

    /// Resources released; the session cannot be reopened
    Closed,
}

impl SessionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        match (self, target) {
            (Idle, Running { .. }) => true,
            (Idle, Closed) => true,

            (Running { .. }, Ended) => true,
            (Running { .. }, Failed) => true,
            (Running { .. }, Closed) => true,

            (Ended, Closed) => true,
            (Failed, Closed) => true,

            (Closed, _) => false,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Running { .. } => "Running",
            SessionState::Ended => "Ended",
            SessionState::Failed => "Failed",
            SessionState::Closed => "Closed",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running { .. })
    }

    /// No more frames will ever be produced.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Ended | SessionState::Failed | SessionState::Closed
        )
    }

    /// Get the duration since the decode thread started (if running)
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        if let SessionState::Running { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let running = SessionState::Running {
            started_at: Instant::now(),
        };

        assert!(SessionState::Idle.can_transition_to(&running));
        assert!(SessionState::Idle.can_transition_to(&SessionState::Closed));
        assert!(running.can_transition_to(&SessionState::Ended));
        assert!(running.can_transition_to(&SessionState::Failed));
        assert!(running.can_transition_to(&SessionState::Closed));
        assert!(SessionState::Ended.can_transition_to(&SessionState::Closed));
        assert!(SessionState::Failed.can_transition_to(&SessionState::Closed));
    }

    #[test]
    fn test_terminal_states_never_restart() {
        let running = SessionState::Running {
            started_at: Instant::now(),
        };

        assert!(!SessionState::Ended.can_transition_to(&running));
        assert!(!SessionState::Failed.can_transition_to(&running));
        assert!(!SessionState::Closed.can_transition_to(&running));
        assert!(!SessionState::Closed.can_transition_to(&SessionState::Idle));
        assert!(!SessionState::Ended.can_transition_to(&SessionState::Failed));
    }

    #[test]
    fn test_state_checks() {
        let running = SessionState::Running {
            started_at: Instant::now(),
        };

        assert!(running.is_running());
        assert!(!running.is_terminal());
        assert!(running.running_duration().is_some());

        for state in [SessionState::Ended, SessionState::Failed, SessionState::Closed] {
            assert!(state.is_terminal());
            assert!(!state.is_running());
        }
        assert!(!SessionState::Idle.is_terminal());
        assert_eq!(SessionState::Failed.to_string(), "Failed");
    }
}
