use thiserror::Error;

/// Errors produced by the session, sync and transport layers.
///
/// Everything except [`ClientError::Presenter`] is recoverable: the
/// supervisor abandons the current attempt and starts over after a backoff.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("server returned code {code}: {message}")]
    Protocol { code: i64, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("challenge presenter failed: {0}")]
    Presenter(String),
    #[error("session cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("no session is logged in")]
    NotLoggedIn,
    #[error("client is shutting down")]
    Shutdown,
}

impl ClientError {
    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        ClientError::Protocol {
            code,
            message: message.into(),
        }
    }

    /// True when retrying cannot help: the presenter is unable to show a
    /// challenge at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Presenter(_))
    }

    /// Network level failure (connection, TLS, timeout) as opposed to a
    /// well-formed but unsuccessful response.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Timeout(_))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

/// Problems with the persisted session. These never reach the application;
/// the session manager falls back to the interactive handshake.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cached session")]
    Missing,
    #[error("cached session is corrupt: {0}")]
    Corrupt(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
