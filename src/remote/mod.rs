//! Interactive TQL over a long-lived shell channel.
//!
//! - `prompt`: marker detection and per-response buffering
//! - `session`: the command/response state machine driving a channel
//! - `ssh`: the SSH-backed channel

pub mod prompt;
pub mod session;
pub mod ssh;

use async_trait::async_trait;

pub use prompt::{Completion, PromptDetector, PromptKind, ReadCycle, SessionState};
pub use session::{RemoteSession, SessionSettings};
pub use ssh::{SshChannel, SshTarget};

/// A bidirectional text channel to an interactive shell.
///
/// `send` never waits for a response and `try_read` never blocks; the
/// session polls `try_read` until a prompt arrives.
#[async_trait]
pub trait ShellChannel: Send {
    /// Name used in errors and logs (usually the host).
    fn name(&self) -> &str;

    /// Write `text` followed by a newline.
    fn send(&mut self, text: &str) -> crate::Result<()>;

    /// Bytes available right now, or `None` if nothing has arrived.
    ///
    /// Fails with `TqlError::ChannelClosed` once the remote end has closed
    /// and every buffered byte has been returned.
    fn try_read(&mut self) -> crate::Result<Option<Vec<u8>>>;

    /// Close the channel. Later sends fail with `TqlError::ChannelClosed`.
    async fn close(&mut self) -> crate::Result<()>;
}
