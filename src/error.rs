//! Error types for TQL session operations.

use thiserror::Error;

/// Why an SSH session could not be established.
///
/// Kept separate from [`TqlError`] so callers can print a targeted one-line
/// diagnostic for each failure mode.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// TCP connect or SSH handshake did not finish within the connect timeout
    #[error("timeout connecting to {0}")]
    Timeout(String),

    /// Password authentication was rejected
    #[error("failed to login as {user} on {host}")]
    Authentication { user: String, host: String },

    /// Server host key conflicts with known_hosts, or is unknown and untrusted
    #[error("host key for {0} was rejected")]
    HostKey(String),

    /// Socket-level or protocol failure before the shell was opened
    #[error("unable to reach {0}: {1}")]
    Unreachable(String, String),
}

/// Main error type for TQL session operations
#[derive(Error, Debug)]
pub enum TqlError {
    /// Connection-time failure; aborts the session
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// I/O failure while talking to a process or channel
    #[error("transport error for '{0}': {1}")]
    Transport(String, String),

    /// Send or read attempted on a channel that has been closed
    #[error("channel to '{0}' is closed")]
    ChannelClosed(String),

    /// The tool reported an error in its diagnostics (raw text attached)
    #[error("error from TQL: {0}")]
    ExternalTool(String),

    /// Local tool invocation outlived its configured timeout and was killed
    #[error("call timeout for '{0}'")]
    CallTimeout(String),

    /// No prompt marker arrived before the response timeout
    #[error("no response from '{0}' after {1}s")]
    ResponseTimeout(String, u64),

    /// The caller cancelled a pending wait
    #[error("wait on '{0}' cancelled")]
    Cancelled(String),

    /// Configuration failed validation
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl TqlError {
    /// True for errors that should end the session rather than just the
    /// current command.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TqlError::Connection(_) | TqlError::ChannelClosed(_) | TqlError::Transport(_, _)
        )
    }
}

/// Result type alias for TQL session operations
pub type Result<T> = std::result::Result<T, TqlError>;
