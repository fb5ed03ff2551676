//! Observer FSM State Definitions
//!
//! ```text
//! STOPPED → STARTING → STREAMING ⇄ BACKOFF → ERROR
//!              ↑  ↓         ↓         ↓
//!              └ BACKOFF  STOPPED   STOPPED
//! ```

use std::fmt;

/// Observer FSM States
///
/// Terminal state: ERROR. A stopped observer may be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverState {
    /// Not running
    Stopped,

    /// Loading the checkpoint and opening the ledger stream
    Starting,

    /// Handling events in ledger order
    Streaming,

    /// Waiting before a retry after a fault
    Backoff,

    /// Terminal: retry budget exhausted, needs manual restart
    Error,
}

impl ObserverState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ObserverState::Error)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: ObserverState) -> bool {
        use ObserverState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Streaming)
                | (Starting, Backoff)
                | (Starting, Stopped)
                | (Streaming, Backoff)
                | (Streaming, Stopped)
                | (Backoff, Streaming)
                | (Backoff, Starting)
                | (Backoff, Stopped)
                | (Backoff, Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObserverState::Stopped => "STOPPED",
            ObserverState::Starting => "STARTING",
            ObserverState::Streaming => "STREAMING",
            ObserverState::Backoff => "BACKOFF",
            ObserverState::Error => "ERROR",
        }
    }
}

impl fmt::Display for ObserverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ObserverState::*;

    const ALL: [ObserverState; 5] = [Stopped, Starting, Streaming, Backoff, Error];

    #[test]
    fn test_only_error_is_terminal() {
        for state in ALL {
            assert_eq!(state.is_terminal(), state == Error);
        }
    }

    #[test]
    fn test_error_has_no_outgoing_transitions() {
        for next in ALL {
            assert!(!Error.can_transition_to(next));
        }
    }

    #[test]
    fn test_main_path() {
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Backoff));
        assert!(Backoff.can_transition_to(Streaming));
        assert!(Backoff.can_transition_to(Error));
        assert!(Streaming.can_transition_to(Stopped));
    }

    #[test]
    fn test_rejected_shortcuts() {
        assert!(!Stopped.can_transition_to(Streaming));
        assert!(!Streaming.can_transition_to(Error));
        assert!(!Starting.can_transition_to(Error));
        assert!(!Streaming.can_transition_to(Starting));
        assert!(!Streaming.can_transition_to(Streaming));
    }

    #[test]
    fn test_display() {
        assert_eq!(Stopped.to_string(), "STOPPED");
        assert_eq!(Backoff.to_string(), "BACKOFF");
    }
}
