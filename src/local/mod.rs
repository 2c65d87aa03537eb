//! One-shot execution of the `tql` binary on this host.
//!
//! Each statement is written to its own temporary file which becomes the
//! child's stdin. The child runs to completion (or until the optional timeout
//! kills it) and both output streams are captured in full before parsing.

pub mod query_file;

use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;

use crate::config::LocalConfig;
use crate::error::TqlError;
use crate::parser::{classify_diagnostics, parse_local_capture, RawCapture};
use crate::table::Table;

pub use query_file::QueryFile;

/// Statement that lists databases.
pub const SHOW_DATABASES: &str = "show databases;";

/// Trim a statement and make sure it ends with `;`.
pub fn terminate_statement(query: &str) -> String {
    let query = query.trim();
    if query.ends_with(';') {
        query.to_string()
    } else {
        format!("{query};")
    }
}

/// Runs statements through a local `tql` process.
#[derive(Debug, Clone)]
pub struct LocalTql {
    config: LocalConfig,
    delimiter: char,
}

impl LocalTql {
    pub fn new(config: LocalConfig, delimiter: char) -> Self {
        Self { config, delimiter }
    }

    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    /// Execute a query and parse its output into a table.
    pub async fn execute_query(&self, query: &str) -> crate::Result<Table> {
        let capture = self.run_statement(query).await?;
        Ok(parse_local_capture(&capture, query, self.delimiter))
    }

    /// List databases, one trimmed name per entry.
    pub async fn databases(&self) -> crate::Result<Vec<String>> {
        let capture = self.run_statement(SHOW_DATABASES).await?;
        Ok(capture
            .stdout_lines
            .iter()
            .map(|line| line.trim().to_string())
            .collect())
    }

    /// Run one statement and return its decoded output streams.
    ///
    /// # Execution
    /// Spawns `<command> <flags...>` directly (never via a shell) with the
    /// statement file as stdin. When `timeout_secs` is configured the wait is
    /// raced against a timer and the child is killed on expiry.
    ///
    /// # Errors
    /// `TqlError::Transport` if the statement file or process cannot be set
    /// up, `TqlError::CallTimeout` on timeout, and `TqlError::ExternalTool`
    /// when stderr carries the `error=` marker. The statement file is removed
    /// on every path.
    pub async fn run_statement(&self, query: &str) -> crate::Result<RawCapture> {
        let start = Instant::now();
        let statement = terminate_statement(query);
        let command = self.config.command.as_str();

        let mut query_file = QueryFile::create(&self.config.temp_dir(), &statement)
            .map_err(|e| {
                TqlError::Transport(command.to_string(), format!("failed to write query file: {e}"))
            })?;

        let result = self.spawn_and_capture(&query_file).await;

        if let Err(e) = query_file.cleanup() {
            tracing::warn!(command = %command, error = %e, "failed to remove query file");
        }

        let output = result?;
        let exit_code = output.status.code().unwrap_or(-1);

        tracing::info!(
            command = %command,
            exit_code = %exit_code,
            duration_ms = %start.elapsed().as_millis(),
            "TQL invocation"
        );
        tracing::debug!(
            stdout = %String::from_utf8_lossy(&output.stdout),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "TQL output"
        );

        let capture = RawCapture::from_bytes(&output.stdout, &output.stderr);
        classify_diagnostics(&capture.stderr_lines.join("\n"))?;
        Ok(capture)
    }

    async fn spawn_and_capture(&self, query_file: &QueryFile) -> crate::Result<std::process::Output> {
        let command = self.config.command.as_str();
        let stdin = query_file.open().map_err(|e| {
            TqlError::Transport(command.to_string(), format!("failed to open query file: {e}"))
        })?;

        let mut cmd = Command::new(command);
        cmd.args(&self.config.flags);
        cmd.stdin(Stdio::from(stdin));
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(command = %command, flags = ?self.config.flags, "spawning TQL");

        let child = cmd.spawn().map_err(|e| {
            TqlError::Transport(command.to_string(), format!("failed to spawn '{command}': {e}"))
        })?;

        let wait = child.wait_with_output();
        let output = match self.config.timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, wait).await {
                Ok(result) => result,
                // Dropping the future kills the child (kill_on_drop)
                Err(_elapsed) => return Err(TqlError::CallTimeout(command.to_string())),
            },
            None => wait.await,
        };

        output.map_err(|e| {
            TqlError::Transport(command.to_string(), format!("process I/O error: {e}"))
        })
    }
}
