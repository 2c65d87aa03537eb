//! SSH-backed shell channel.
//!
//! Key design decisions:
//! - One session channel with a PTY and a login shell, opened once and kept
//!   for the lifetime of the session.
//! - The russh `Channel` is owned by a pump task that forwards queued input
//!   and pushes every received chunk into an unbounded queue. Draining that
//!   queue with `try_recv` is what makes reads non-blocking.
//! - Dropping the input sender is the close signal: the pump sends EOF and
//!   closes the channel, then exits, which in turn closes the output queue.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::config::RemoteConfig;
use crate::error::{ConnectionError, TqlError};
use crate::remote::ShellChannel;

/// PTY width. Wide enough that the shell does not wrap echoed statements.
const PTY_COLUMNS: u32 = 1024;
const PTY_ROWS: u32 = 48;

/// Where and how to log in.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub trust_unknown_hosts: bool,
}

impl SshTarget {
    /// Build a target for `host` from config; the password `${VAR}` reference
    /// is resolved here.
    pub fn from_config(host: &str, config: &RemoteConfig) -> Self {
        Self {
            host: host.to_string(),
            port: config.port,
            username: config.username.clone(),
            password: config.resolved_password().unwrap_or_default(),
            connect_timeout: config.connect_timeout(),
            trust_unknown_hosts: config.trust_unknown_hosts,
        }
    }
}

/// Host key check against the user's known_hosts.
///
/// A recorded key that differs is always rejected. Unknown hosts are
/// accepted for this connection only when `trust_unknown_hosts` is set.
struct HostKeyPolicy {
    host: String,
    port: u16,
    trust_unknown_hosts: bool,
}

#[async_trait]
impl client::Handler for HostKeyPolicy {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match russh_keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Err(russh_keys::Error::KeyChanged { line }) => {
                tracing::error!(
                    host = %self.host,
                    known_hosts_line = line,
                    "server key does not match known_hosts"
                );
                Ok(false)
            }
            Ok(false) | Err(_) => {
                if self.trust_unknown_hosts {
                    tracing::info!(host = %self.host, "accepting unknown host key");
                } else {
                    tracing::warn!(host = %self.host, "rejecting unknown host key");
                }
                Ok(self.trust_unknown_hosts)
            }
        }
    }
}

fn classify_connect_error(host: &str, error: russh::Error) -> ConnectionError {
    match error {
        russh::Error::UnknownKey => ConnectionError::HostKey(host.to_string()),
        russh::Error::IO(e) if e.kind() == io::ErrorKind::TimedOut => {
            ConnectionError::Timeout(host.to_string())
        }
        other => ConnectionError::Unreachable(host.to_string(), other.to_string()),
    }
}

/// Interactive shell channel over SSH.
pub struct SshChannel {
    host: String,
    handle: Option<Handle<HostKeyPolicy>>,
    input_tx: Option<UnboundedSender<Vec<u8>>>,
    output_rx: UnboundedReceiver<Vec<u8>>,
    pump: Option<JoinHandle<()>>,
}

impl SshChannel {
    /// Connect, authenticate with a password, and open a PTY shell.
    ///
    /// # Errors
    /// - `ConnectionError::Timeout` if connect or authentication outlives
    ///   `connect_timeout`
    /// - `ConnectionError::HostKey` if the server key is rejected
    /// - `ConnectionError::Authentication` if the password is refused
    /// - `ConnectionError::Unreachable` for any other socket or protocol failure
    pub async fn connect(target: &SshTarget) -> crate::Result<Self> {
        let host = target.host.clone();
        let config = Arc::new(client::Config::default());
        let policy = HostKeyPolicy {
            host: host.clone(),
            port: target.port,
            trust_unknown_hosts: target.trust_unknown_hosts,
        };

        tracing::info!(host = %host, port = target.port, "connecting to remote TQL host");

        let connect = client::connect(config, (host.as_str(), target.port), policy);
        let mut handle = match tokio::time::timeout(target.connect_timeout, connect).await {
            Err(_elapsed) => return Err(ConnectionError::Timeout(host).into()),
            Ok(Err(e)) => return Err(classify_connect_error(&host, e).into()),
            Ok(Ok(handle)) => handle,
        };

        let auth = handle.authenticate_password(target.username.clone(), target.password.clone());
        let authenticated = match tokio::time::timeout(target.connect_timeout, auth).await {
            Err(_elapsed) => return Err(ConnectionError::Timeout(host).into()),
            Ok(Err(e)) => return Err(classify_connect_error(&host, e).into()),
            Ok(Ok(authenticated)) => authenticated,
        };
        if !authenticated {
            return Err(ConnectionError::Authentication {
                user: target.username.clone(),
                host,
            }
            .into());
        }

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| ConnectionError::Unreachable(host.clone(), e.to_string()))?;
        channel
            .request_pty(false, "xterm", PTY_COLUMNS, PTY_ROWS, 0, 0, &[])
            .await
            .map_err(|e| ConnectionError::Unreachable(host.clone(), e.to_string()))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| ConnectionError::Unreachable(host.clone(), e.to_string()))?;

        tracing::info!(host = %host, user = %target.username, "interactive shell opened");

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_channel(channel, input_rx, output_tx, host.clone()));

        Ok(Self {
            host,
            handle: Some(handle),
            input_tx: Some(input_tx),
            output_rx,
            pump: Some(pump),
        })
    }
}

/// Shuttle bytes between the session queues and the russh channel until
/// either side closes.
async fn pump_channel(
    mut channel: Channel<Msg>,
    mut input_rx: UnboundedReceiver<Vec<u8>>,
    output_tx: UnboundedSender<Vec<u8>>,
    host: String,
) {
    loop {
        tokio::select! {
            outbound = input_rx.recv() => {
                match outbound {
                    Some(bytes) => {
                        if let Err(e) = channel.data(&bytes[..]).await {
                            tracing::warn!(host = %host, error = %e, "write to shell channel failed");
                            break;
                        }
                    }
                    None => {
                        // Session side closed or dropped
                        let _ = channel.eof().await;
                        let _ = channel.close().await;
                        tracing::debug!(host = %host, "shell channel closed by session");
                        break;
                    }
                }
            }
            inbound = channel.wait() => {
                match inbound {
                    Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                        tracing::trace!(host = %host, bytes = data.len(), "shell output");
                        if output_tx.send(data.to_vec()).is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        tracing::debug!(host = %host, exit_status, "remote shell exited");
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                        tracing::info!(host = %host, "remote closed shell channel");
                        break;
                    }
                    Some(_) => {}
                }
            }
        }
    }
}

#[async_trait]
impl ShellChannel for SshChannel {
    fn name(&self) -> &str {
        &self.host
    }

    fn send(&mut self, text: &str) -> crate::Result<()> {
        let tx = self
            .input_tx
            .as_ref()
            .ok_or_else(|| TqlError::ChannelClosed(self.host.clone()))?;
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');
        tx.send(bytes)
            .map_err(|_| TqlError::ChannelClosed(self.host.clone()))
    }

    fn try_read(&mut self) -> crate::Result<Option<Vec<u8>>> {
        match self.output_rx.try_recv() {
            Ok(bytes) => Ok(Some(bytes)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TqlError::ChannelClosed(self.host.clone())),
        }
    }

    async fn close(&mut self) -> crate::Result<()> {
        let Some(input_tx) = self.input_tx.take() else {
            return Ok(());
        };
        drop(input_tx);

        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        if let Some(handle) = self.handle.take() {
            handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
                .map_err(|e| TqlError::Transport(self.host.clone(), e.to_string()))?;
        }

        tracing::info!(host = %self.host, "SSH session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_key_maps_to_host_key_error() {
        let err = classify_connect_error("tstest", russh::Error::UnknownKey);
        assert!(matches!(err, ConnectionError::HostKey(host) if host == "tstest"));
    }

    #[test]
    fn test_timed_out_io_maps_to_timeout() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timed out");
        let err = classify_connect_error("tstest", russh::Error::IO(io_err));
        assert!(matches!(err, ConnectionError::Timeout(host) if host == "tstest"));
    }

    #[test]
    fn test_refused_io_maps_to_unreachable() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = classify_connect_error("tstest", russh::Error::IO(io_err));
        assert!(matches!(err, ConnectionError::Unreachable(host, _) if host == "tstest"));
    }

    #[test]
    fn test_target_from_config_resolves_password() {
        // SAFETY: test-only, no concurrent threads depend on this env var.
        unsafe { std::env::set_var("RTQL_TEST_SSH_PW", "pw") };
        let config = RemoteConfig {
            password: Some("${RTQL_TEST_SSH_PW}".to_string()),
            ..RemoteConfig::default()
        };
        let target = SshTarget::from_config("tstest", &config);
        assert_eq!(target.host, "tstest");
        assert_eq!(target.port, 22);
        assert_eq!(target.username, "admin");
        assert_eq!(target.password, "pw");
        assert_eq!(target.connect_timeout, Duration::from_secs(10));
        // SAFETY: test-only cleanup.
        unsafe { std::env::remove_var("RTQL_TEST_SSH_PW") };
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails_fast() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = SshTarget {
            host: "127.0.0.1".to_string(),
            port,
            username: "admin".to_string(),
            password: "x".to_string(),
            connect_timeout: Duration::from_secs(5),
            trust_unknown_hosts: true,
        };
        let result = SshChannel::connect(&target).await;
        assert!(
            matches!(
                result,
                Err(TqlError::Connection(ConnectionError::Unreachable(_, _)))
            ),
            "closed port should be unreachable"
        );
    }
}
