//! rtql configuration: deserialization, defaults and validation.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::TqlError;

/// Strip an env var reference to its variable name.
///
/// Accepts `${VAR_NAME}` syntax only. Returns `None` if the value is not a
/// valid env-var reference.
pub fn parse_env_ref(value: &str) -> Option<&str> {
    value.strip_prefix("${").and_then(|s| s.strip_suffix('}'))
}

/// Resolve a value that may be a `${VAR}` reference.
///
/// Literal values are returned unchanged. Unknown variables resolve to the
/// empty string (same as shell `${UNSET-}`).
pub fn resolve_env_ref(value: &str) -> String {
    match parse_env_ref(value) {
        Some(var_name) => std::env::var(var_name).unwrap_or_default(),
        None => value.to_string(),
    }
}

/// Top-level configuration, parsed from `rtql.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct TqlConfig {
    /// Column separator used by TQL output.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Settings for running the `tql` binary on this machine.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    /// Path to the tql executable.
    #[serde(default = "default_local_command")]
    pub command: String,
    /// Flags passed on every invocation.
    #[serde(default = "default_local_flags")]
    pub flags: Vec<String>,
    /// Directory for the per-query statement file. Defaults to the OS temp dir.
    pub temp_dir: Option<PathBuf>,
    /// Kill the tool after this many seconds. Unset means wait indefinitely.
    pub timeout_secs: Option<u64>,
}

/// Settings for the interactive SSH session.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    /// Literal password or `${VAR}` reference.
    pub password: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Accept hosts that are absent from known_hosts.
    #[serde(default = "default_trust_unknown_hosts")]
    pub trust_unknown_hosts: bool,
    /// Command typed into the login shell to start TQL.
    #[serde(default = "default_shell_command")]
    pub shell_command: String,
    /// Name printed in the ready prompt, e.g. `TQL [database=foo]`.
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
    /// Prompt printed while a statement is incomplete.
    #[serde(default = "default_continuation_marker")]
    pub continuation_marker: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
}

fn default_delimiter() -> char {
    '|'
}

fn default_local_command() -> String {
    "/usr/local/scaligent/release/bin/tql".to_string()
}

fn default_local_flags() -> Vec<String> {
    vec!["-query_results_apply_top_row_count=-1".to_string()]
}

fn default_port() -> u16 {
    22
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_trust_unknown_hosts() -> bool {
    true
}

fn default_shell_command() -> String {
    "tql -script_comments=false".to_string()
}

fn default_tool_name() -> String {
    "TQL".to_string()
}

fn default_continuation_marker() -> String {
    "$> ".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_response_timeout_secs() -> u64 {
    300
}

impl Default for TqlConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            local: LocalConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            command: default_local_command(),
            flags: default_local_flags(),
            temp_dir: None,
            timeout_secs: None,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            username: default_username(),
            password: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            trust_unknown_hosts: default_trust_unknown_hosts(),
            shell_command: default_shell_command(),
            tool_name: default_tool_name(),
            continuation_marker: default_continuation_marker(),
            poll_interval_ms: default_poll_interval_ms(),
            response_timeout_secs: default_response_timeout_secs(),
        }
    }
}

impl LocalConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl RemoteConfig {
    /// The password with any `${VAR}` reference resolved.
    pub fn resolved_password(&self) -> Option<String> {
        self.password.as_deref().map(resolve_env_ref)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

impl TqlConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: TqlConfig =
            toml::from_str(content).map_err(|e| TqlError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config, failing fast before any process or connection is started.
    pub fn validate(&self) -> crate::Result<()> {
        // 1. Delimiter must not collide with quoting or line structure
        if matches!(self.delimiter, '"' | '\\' | '\n' | '\r') {
            return Err(TqlError::InvalidConfig(format!(
                "delimiter {:?} conflicts with quoting or line endings",
                self.delimiter
            )));
        }

        // 2. Local tool
        if self.local.command.trim().is_empty() {
            return Err(TqlError::InvalidConfig(
                "local.command must not be empty".to_string(),
            ));
        }

        // 3. Remote prompt markers
        let remote = &self.remote;
        if remote.tool_name.trim().is_empty() {
            return Err(TqlError::InvalidConfig(
                "remote.tool_name must not be empty".to_string(),
            ));
        }
        if remote.continuation_marker.is_empty() {
            return Err(TqlError::InvalidConfig(
                "remote.continuation_marker must not be empty".to_string(),
            ));
        }
        if remote.shell_command.trim().is_empty() {
            return Err(TqlError::InvalidConfig(
                "remote.shell_command must not be empty".to_string(),
            ));
        }

        // 4. Timing
        if remote.poll_interval_ms == 0 {
            return Err(TqlError::InvalidConfig(
                "remote.poll_interval_ms must be > 0".to_string(),
            ));
        }
        if remote.connect_timeout_secs == 0 {
            return Err(TqlError::InvalidConfig(
                "remote.connect_timeout_secs must be > 0".to_string(),
            ));
        }
        if remote.response_timeout_secs == 0 {
            return Err(TqlError::InvalidConfig(
                "remote.response_timeout_secs must be > 0".to_string(),
            ));
        }

        // 5. Password references: `$VAR` is almost always a typo for `${VAR}`
        if let Some(password) = &remote.password {
            if password.starts_with('$') && parse_env_ref(password).is_none() {
                return Err(TqlError::InvalidConfig(format!(
                    "remote.password must be a ${{VAR}} reference or a literal, got '{}'",
                    password
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_toml(toml_str: &str) -> TqlConfig {
        toml::from_str(toml_str).expect("valid TOML")
    }

    #[test]
    fn test_parse_env_ref() {
        assert_eq!(parse_env_ref("${FOO}"), Some("FOO"));
        assert_eq!(parse_env_ref("$FOO"), None);
        assert_eq!(parse_env_ref("literal"), None);
        assert_eq!(parse_env_ref("${}"), Some(""));
    }

    #[test]
    fn test_resolve_env_ref() {
        // SAFETY: test-only, no concurrent threads depend on this env var.
        unsafe { std::env::set_var("RTQL_TEST_PASSWORD", "s3cret") };
        assert_eq!(resolve_env_ref("${RTQL_TEST_PASSWORD}"), "s3cret");
        assert_eq!(resolve_env_ref("plain"), "plain");
        // SAFETY: test-only cleanup.
        unsafe { std::env::remove_var("RTQL_TEST_PASSWORD") };
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_toml("");
        assert!(config.validate().is_ok());
        assert_eq!(config.delimiter, '|');
        assert_eq!(config.local.command, "/usr/local/scaligent/release/bin/tql");
        assert_eq!(
            config.local.flags,
            vec!["-query_results_apply_top_row_count=-1".to_string()]
        );
        assert_eq!(config.local.timeout(), None);
        assert_eq!(config.remote.port, 22);
        assert_eq!(config.remote.username, "admin");
        assert_eq!(config.remote.tool_name, "TQL");
        assert_eq!(config.remote.continuation_marker, "$> ");
        assert_eq!(config.remote.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.remote.connect_timeout(), Duration::from_secs(10));
        assert!(config.remote.trust_unknown_hosts);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = parse_toml(
            r#"
            [local]
            command = "/opt/tql/bin/tql"
            timeout_secs = 60

            [remote]
            username = "ops"
            poll_interval_ms = 250
            "#,
        );
        assert!(config.validate().is_ok());
        assert_eq!(config.local.command, "/opt/tql/bin/tql");
        assert_eq!(config.local.timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.local.flags.len(), 1);
        assert_eq!(config.remote.username, "ops");
        assert_eq!(config.remote.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.remote.shell_command, "tql -script_comments=false");
    }

    #[test]
    fn test_quote_delimiter_rejected() {
        let config = parse_toml(r#"delimiter = '"'"#);
        let result = config.validate();
        assert!(matches!(result, Err(TqlError::InvalidConfig(msg)) if msg.contains("delimiter")));
    }

    #[test]
    fn test_empty_tool_name_rejected() {
        let config = parse_toml(
            r#"
            [remote]
            tool_name = " "
            "#,
        );
        let result = config.validate();
        assert!(matches!(result, Err(TqlError::InvalidConfig(msg)) if msg.contains("tool_name")));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config = parse_toml(
            r#"
            [remote]
            poll_interval_ms = 0
            "#,
        );
        let result = config.validate();
        assert!(
            matches!(result, Err(TqlError::InvalidConfig(msg)) if msg.contains("poll_interval_ms"))
        );
    }

    #[test]
    fn test_bare_dollar_password_rejected() {
        let config = parse_toml(
            r#"
            [remote]
            password = "$RTQL_PASSWORD"
            "#,
        );
        assert!(
            matches!(config.validate(), Err(TqlError::InvalidConfig(_))),
            "bare $VAR should be rejected, use ${{VAR}} syntax"
        );
    }

    #[test]
    fn test_password_reference_resolved() {
        // SAFETY: test-only, no concurrent threads depend on this env var.
        unsafe { std::env::set_var("RTQL_TEST_REMOTE_PW", "hunter2") };
        let config = parse_toml(
            r#"
            [remote]
            password = "${RTQL_TEST_REMOTE_PW}"
            "#,
        );
        assert!(config.validate().is_ok());
        assert_eq!(config.remote.resolved_password().as_deref(), Some("hunter2"));
        // SAFETY: test-only cleanup.
        unsafe { std::env::remove_var("RTQL_TEST_REMOTE_PW") };
    }

    #[test]
    fn test_from_toml_str_reports_syntax_errors() {
        let result = TqlConfig::from_toml_str("[remote\nport = 22");
        assert!(matches!(result, Err(TqlError::InvalidConfig(_))));
    }
}
