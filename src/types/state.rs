use std::fmt;

/// Login lifecycle. Transitions run forward in declaration order; `Failed`
/// can be entered from any state and the supervisor restarts from
/// `HandshakeStarted`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    HandshakeStarted,
    AwaitingScan,
    Scanned,
    Confirmed,
    Authenticating,
    Initialized,
    Ready,
    Failed(String),
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => f.write_str("uninitialized"),
            SessionState::HandshakeStarted => f.write_str("handshake started"),
            SessionState::AwaitingScan => f.write_str("awaiting scan"),
            SessionState::Scanned => f.write_str("scanned"),
            SessionState::Confirmed => f.write_str("confirmed"),
            SessionState::Authenticating => f.write_str("authenticating"),
            SessionState::Initialized => f.write_str("initialized"),
            SessionState::Ready => f.write_str("ready"),
            SessionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
