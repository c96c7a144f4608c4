use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Lifecycle of the upstream FIX session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    LoggedOn,
    /// Logged on with a sequence gap being recovered
    Resynchronizing,
    LoggedOut,
}

impl SessionState {
    /// Legal edges of the session state machine
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, LoggedOn)
                | (Connecting, Disconnected)
                | (LoggedOn, Resynchronizing)
                | (Resynchronizing, LoggedOn)
                | (LoggedOn, LoggedOut)
                | (Resynchronizing, LoggedOut)
                | (LoggedOn, Disconnected)
                | (Resynchronizing, Disconnected)
                | (LoggedOut, Connecting)
                | (LoggedOut, Disconnected)
        )
    }

    /// Market data flows in these states
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::LoggedOn | SessionState::Resynchronizing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::LoggedOn => "logged_on",
            SessionState::Resynchronizing => "resynchronizing",
            SessionState::LoggedOut => "logged_out",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
