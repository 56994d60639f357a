//! Session lifecycle for a live duplex audio session

use crate::error::LiveError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    /// Caller asked to start
    Start,
    /// Remote acknowledged the setup message
    SetupComplete,
    /// Caller asked to stop
    Stop,
    /// Connection, setup or transport failure, including an unexpected remote close
    Failure,
    /// Resources released
    Released,
    /// Handle is ready for another start
    Reset,
}

impl SessionState {
    /// Next state for `event`, or `IllegalTransition` when the table has no edge.
    pub fn transition(self, event: SessionEvent) -> Result<SessionState, LiveError> {
        use SessionEvent::*;
        use SessionState::*;

        let next = match (self, event) {
            (Idle, Start) => Connecting,
            (Connecting, SetupComplete) => Open,
            (Connecting, Failure) => Errored,
            (Open, Stop) => Closing,
            (Open, Failure) => Errored,
            (Closing, Released) | (Errored, Released) => Closed,
            (Closed, Reset) => Idle,
            (from, event) => {
                tracing::warn!(target: "nexus::live", ?from, ?event, "Illegal session transition");
                return Err(LiveError::IllegalTransition { from, event });
            }
        };
        Ok(next)
    }
}
