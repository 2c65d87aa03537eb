//! tql-session: drives the TQL shell and parses its output into tables.
//! Runs statements through a local `tql` process, or keeps an interactive
//! TQL shell open over SSH and detects command completion from its prompts.

pub mod config;
pub mod error;
pub mod local;
pub mod parser;
pub mod remote;
pub mod table;
pub mod tokenizer;

pub use config::{parse_env_ref, resolve_env_ref, LocalConfig, RemoteConfig, TqlConfig};
pub use error::{ConnectionError, Result, TqlError};
pub use local::{LocalTql, QueryFile};
pub use parser::{classify_diagnostics, parse_local_capture, parse_merged_lines, RawCapture};
pub use remote::{
    PromptDetector, PromptKind, RemoteSession, SessionSettings, SessionState, ShellChannel,
    SshChannel, SshTarget,
};
pub use table::Table;
pub use tokenizer::{join_fields, split_fields};
