//! Command/response cycle over an interactive TQL shell.
//!
//! One command is in flight at a time: `send` the text, then poll the
//! channel until a prompt marker closes the response. Waits are bounded by
//! the response timeout and can be abandoned through a `CancellationToken`.
//! An abandoned response is still owed by the shell; its remaining output is
//! drained up to its prompt before the next command is sent.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{RemoteConfig, TqlConfig};
use crate::error::TqlError;
use crate::local::SHOW_DATABASES;
use crate::parser::{classify_diagnostics, parse_merged_lines};
use crate::remote::prompt::{Completion, PromptDetector, PromptKind, ReadCycle, SessionState};
use crate::remote::ssh::{SshChannel, SshTarget};
use crate::remote::ShellChannel;
use crate::table::Table;

/// Timing and marker settings for a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub shell_command: String,
    pub poll_interval: Duration,
    pub response_timeout: Duration,
    pub delimiter: char,
    detector: PromptDetector,
}

impl SessionSettings {
    pub fn from_config(config: &TqlConfig) -> crate::Result<Self> {
        Self::new(&config.remote, config.delimiter)
    }

    pub fn new(remote: &RemoteConfig, delimiter: char) -> crate::Result<Self> {
        Ok(Self {
            shell_command: remote.shell_command.clone(),
            poll_interval: remote.poll_interval(),
            response_timeout: remote.response_timeout(),
            delimiter,
            detector: PromptDetector::from_config(remote)?,
        })
    }
}

/// A live TQL shell session.
pub struct RemoteSession<C: ShellChannel = SshChannel> {
    channel: C,
    settings: SessionSettings,
    state: SessionState,
    /// Partial response of a command whose wait timed out or was cancelled
    abandoned: Option<ReadCycle>,
    closed: bool,
}

impl RemoteSession<SshChannel> {
    /// Log in to `host` over SSH and start TQL.
    pub async fn connect(host: &str, config: &TqlConfig) -> crate::Result<Self> {
        config.validate()?;
        let settings = SessionSettings::from_config(config)?;
        let target = SshTarget::from_config(host, &config.remote);
        let channel = SshChannel::connect(&target).await?;
        Self::start(channel, settings).await
    }
}

impl<C: ShellChannel> RemoteSession<C> {
    /// Start the TQL shell on an already-open channel and wait for its
    /// first prompt.
    pub async fn start(channel: C, settings: SessionSettings) -> crate::Result<Self> {
        let mut session = Self::attach(channel, settings);
        let shell_command = session.settings.shell_command.clone();
        let banner = session.run_command(&shell_command).await?;
        for line in &banner {
            tracing::debug!(host = %session.channel.name(), line = %line, "TQL banner");
        }
        tracing::info!(
            host = %session.channel.name(),
            prompt = %session.state.prompt_text(),
            "TQL session started"
        );
        Ok(session)
    }

    /// Wrap a channel without starting anything on it.
    pub fn attach(channel: C, settings: SessionSettings) -> Self {
        Self {
            channel,
            settings,
            state: SessionState::default(),
            abandoned: None,
            closed: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Prompt to show a human before the next command.
    pub fn prompt(&self) -> String {
        self.state.prompt_text()
    }

    pub fn host(&self) -> &str {
        self.channel.name()
    }

    /// Run a command and return its output lines (prompt and echo removed).
    pub async fn run_command(&mut self, command: &str) -> crate::Result<Vec<String>> {
        self.run_command_with(command, &CancellationToken::new()).await
    }

    /// Like [`run_command`](Self::run_command), abandoning the wait when
    /// `cancel` fires.
    ///
    /// If an earlier wait was abandoned, its output is discarded up to its
    /// prompt first. When that drain times out or is cancelled too, `command`
    /// is not sent.
    pub async fn run_command_with(
        &mut self,
        command: &str,
        cancel: &CancellationToken,
    ) -> crate::Result<Vec<String>> {
        if self.closed {
            return Err(TqlError::ChannelClosed(self.channel.name().to_string()));
        }
        self.discard_abandoned(cancel).await?;

        let command = command.trim_end_matches(['\r', '\n']);
        tracing::debug!(host = %self.channel.name(), command = %command, "sending command");
        self.channel.send(command)?;

        let mut cycle = ReadCycle::new();
        match self.await_prompt(&mut cycle, cancel).await {
            Ok(completion) => Ok(self.finish(cycle, completion)),
            Err(e) => Err(self.abandon(cycle, e)),
        }
    }

    /// True while the shell still owes the response of an abandoned command.
    pub fn is_draining(&self) -> bool {
        self.abandoned.is_some()
    }

    /// Run a statement and parse the merged output into a table.
    pub async fn execute_query(&mut self, query: &str) -> crate::Result<Table> {
        let lines = self.run_command(query).await?;
        parse_merged_lines(&lines, query, self.settings.delimiter)
    }

    /// List databases, one trimmed name per entry.
    pub async fn databases(&mut self) -> crate::Result<Vec<String>> {
        let lines = self.run_command(SHOW_DATABASES).await?;
        classify_diagnostics(&lines.join("\n"))?;
        Ok(lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Close the channel. Safe to call more than once.
    pub async fn close(&mut self) -> crate::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        tracing::info!(
            host = %self.channel.name(),
            prompt = %self.state.prompt_text(),
            "closing connection"
        );
        self.channel.close().await
    }

    /// Read and drop the rest of an abandoned response.
    async fn discard_abandoned(&mut self, cancel: &CancellationToken) -> crate::Result<()> {
        let Some(mut cycle) = self.abandoned.take() else {
            return Ok(());
        };
        tracing::debug!(host = %self.channel.name(), "draining output of abandoned command");
        match self.await_prompt(&mut cycle, cancel).await {
            Ok(completion) => {
                let discarded = self.finish(cycle, completion);
                tracing::info!(
                    host = %self.channel.name(),
                    lines = discarded.len(),
                    "discarded late output of abandoned command"
                );
                Ok(())
            }
            Err(e) => Err(self.abandon(cycle, e)),
        }
    }

    /// Keep `cycle` for draining when the wait ended without a prompt.
    fn abandon(&mut self, cycle: ReadCycle, error: TqlError) -> TqlError {
        if matches!(error, TqlError::ResponseTimeout(..) | TqlError::Cancelled(_)) {
            self.abandoned = Some(cycle);
        }
        error
    }

    /// Poll the channel until a prompt closes the response in `cycle`.
    async fn await_prompt(
        &mut self,
        cycle: &mut ReadCycle,
        cancel: &CancellationToken,
    ) -> crate::Result<Completion> {
        let deadline = Instant::now() + self.settings.response_timeout;

        loop {
            let mut received = false;
            while let Some(chunk) = self.channel.try_read()? {
                tracing::trace!(host = %self.channel.name(), bytes = chunk.len(), "received");
                cycle.push(&chunk);
                received = true;
            }

            if received {
                if let Some(completion) = cycle.scan(&self.settings.detector) {
                    return Ok(completion);
                }
            }

            if Instant::now() >= deadline {
                return Err(TqlError::ResponseTimeout(
                    self.channel.name().to_string(),
                    self.settings.response_timeout.as_secs(),
                ));
            }
            if received {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = cancel.cancelled() => {
                    tracing::info!(host = %self.channel.name(), "wait cancelled");
                    return Err(TqlError::Cancelled(self.channel.name().to_string()));
                }
            }
        }
    }

    fn finish(&mut self, cycle: ReadCycle, completion: Completion) -> Vec<String> {
        let kind = completion.prompt_kind();
        if kind == PromptKind::Partial {
            tracing::debug!(host = %self.channel.name(), "statement awaiting continuation");
        }
        self.state.set_kind(kind);
        cycle.into_output(&completion)
    }
}
