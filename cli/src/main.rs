//! rtql: run TQL statements locally or against a remote cluster over SSH.
//!
//! Three subcommands:
//! - `rtql remote <host>`: interactive TQL shell over SSH (or streamed from stdin)
//! - `rtql query "<statement>"`: one-shot local query
//! - `rtql databases`: list databases with the local tool

mod commands;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tql_session::{LocalTql, RemoteSession, Table, TqlConfig, TqlError};
use tracing_subscriber::EnvFilter;

use crate::commands::MetaCommand;

const CONFIG_FILE: &str = "rtql.toml";

/// rtql: drive the TQL shell locally or over SSH.
#[derive(Parser)]
#[command(name = "rtql", version, about = "Run TQL locally or against a remote cluster")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a TQL shell on a remote host over SSH
    Remote {
        /// IP or host name of the cluster node
        hostname: String,
        /// SSH user [default: remote.username from config, "admin"]
        #[arg(short, long)]
        username: Option<String>,
        /// SSH password [default: remote.password from config]
        #[arg(long, env = "RTQL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// SSH port [default: remote.port from config, 22]
        #[arg(short, long)]
        port: Option<u16>,
        /// Path to rtql.toml [default: ./rtql.toml or ~/.config/rtql/rtql.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run one statement with the local TQL tool
    Query {
        /// Statement to run; a trailing ';' is added when missing
        statement: String,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Path to rtql.toml [default: ./rtql.toml or ~/.config/rtql/rtql.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List databases with the local TQL tool
    Databases {
        /// Path to rtql.toml [default: ./rtql.toml or ~/.config/rtql/rtql.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Delimited lines, header first
    Text,
    Json,
}

/// What the interactive loop does after a command.
enum Flow {
    Continue,
    Exit,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Remote {
            hostname,
            username,
            password,
            port,
            config,
        } => {
            let mut config = load_config(config.as_deref()).await?;
            if let Some(username) = username {
                config.remote.username = username;
            }
            if let Some(password) = password {
                config.remote.password = Some(password);
            }
            if let Some(port) = port {
                config.remote.port = port;
            }
            run_remote(&hostname, config).await?;
        }
        Commands::Query {
            statement,
            format,
            config,
        } => {
            let config = load_config(config.as_deref()).await?;
            let local = LocalTql::new(config.local.clone(), config.delimiter);
            tracing::debug!(command = %local.config().command, "running local query");
            let table = local
                .execute_query(&statement)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            print_table(&table, format, config.delimiter)?;
        }
        Commands::Databases { config } => {
            let config = load_config(config.as_deref()).await?;
            let local = LocalTql::new(config.local.clone(), config.delimiter);
            let databases = local
                .databases()
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            for database in databases {
                println!("{database}");
            }
        }
    }

    Ok(())
}

/// Connect, then pick streamed or interactive input.
///
/// Connection failures print one line and exit with status 1.
async fn run_remote(hostname: &str, config: TqlConfig) -> Result<()> {
    let mut session = match RemoteSession::connect(hostname, &config).await {
        Ok(session) => session,
        Err(TqlError::Connection(e)) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to start TQL on {}: {}", hostname, e)),
    };

    let outcome = if std::io::stdin().is_terminal() {
        interactive_mode(&mut session).await
    } else {
        stream_commands(&mut session).await
    };

    if let Err(e) = session.close().await {
        tracing::warn!(host = %hostname, error = %e, "error while closing session");
    }
    outcome
}

/// Every stdin line is sent as one command; output goes to stdout.
async fn stream_commands(session: &mut RemoteSession) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        run_tql(session, &line).await?;
    }
    Ok(())
}

async fn interactive_mode(session: &mut RemoteSession) -> Result<()> {
    println!("Starting RTQL version {}", env!("CARGO_PKG_VERSION"));
    let mut editor = DefaultEditor::new()?;

    loop {
        let prompt = session.prompt();
        let input = tokio::task::block_in_place(|| editor.readline(&prompt));
        let line = match input {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        if !line.trim().is_empty() {
            if let Err(e) = editor.add_history_entry(line.as_str()) {
                tracing::debug!(error = %e, "failed to record history entry");
            }
        }

        match dispatch(session, &line).await? {
            Flow::Continue => {}
            Flow::Exit => break,
        }
    }
    Ok(())
}

async fn dispatch(session: &mut RemoteSession, line: &str) -> Result<Flow> {
    match MetaCommand::parse(line) {
        MetaCommand::Empty => {}
        MetaCommand::Exit => return Ok(Flow::Exit),
        MetaCommand::ReadMissingFile => eprintln!("filename required"),
        MetaCommand::Read(path) => read_from_file(session, &path).await?,
        MetaCommand::Run(words) => run_shell_command(&words).await,
        MetaCommand::Tql(command) => run_tql(session, &command).await?,
    }
    Ok(Flow::Continue)
}

/// Send each line of `path` as a command.
async fn read_from_file(session: &mut RemoteSession, path: &Path) -> Result<()> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            return Ok(());
        }
    };
    for line in content.lines() {
        run_tql(session, line).await?;
    }
    Ok(())
}

async fn run_shell_command(words: &[String]) {
    let Some((program, args)) = words.split_first() else {
        eprintln!("command required");
        return;
    };
    match tokio::process::Command::new(program).args(args).status().await {
        Ok(status) if !status.success() => {
            tracing::debug!(program = %program, status = %status, "command exited with failure");
        }
        Ok(_) => {}
        Err(e) => eprintln!("{program}: {e}"),
    }
}

/// Send one command and print its output lines.
///
/// Per-command failures (tool errors, timeouts, Ctrl-C) are reported and the
/// session continues; a closed channel or transport failure ends it.
async fn run_tql(session: &mut RemoteSession, command: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => watcher.cancel(),
            _ = watcher.cancelled() => {}
        }
    });
    // Dropping the guard stops the Ctrl-C watcher
    let _guard = cancel.clone().drop_guard();

    match session.run_command_with(command, &cancel).await {
        Ok(lines) => {
            if !lines.is_empty() {
                println!("{}", lines.join("\n"));
            }
            Ok(())
        }
        Err(e) if e.is_fatal() => Err(anyhow::anyhow!("{}", e)),
        Err(e @ (TqlError::Cancelled(_) | TqlError::ResponseTimeout(..))) => {
            eprintln!("{e}");
            if session.is_draining() {
                tracing::warn!(
                    host = %session.host(),
                    "remote command is still running; its output will be discarded before the next command"
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{e}");
            Ok(())
        }
    }
}

fn print_table(table: &Table, format: OutputFormat, delimiter: char) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for line in table.to_delimited_lines(delimiter) {
                println!("{line}");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(table)?);
        }
    }
    Ok(())
}

/// Resolve config file path: explicit flag → ./rtql.toml → ~/.config/rtql/rtql.toml.
///
/// `None` means no file was found and built-in defaults apply.
fn resolve_config(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file {:?} does not exist", path));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let local = Path::new(CONFIG_FILE);
    if local.exists() {
        return Ok(Some(local.to_path_buf()));
    }

    if let Some(config_dir) = dirs::config_dir() {
        let xdg = config_dir.join("rtql").join(CONFIG_FILE);
        if xdg.exists() {
            return Ok(Some(xdg));
        }
    }

    Ok(None)
}

/// Load and validate rtql.toml, or fall back to defaults.
async fn load_config(explicit: Option<&Path>) -> Result<TqlConfig> {
    let Some(config_path) = resolve_config(explicit)? else {
        tracing::debug!("no rtql.toml found, using defaults");
        return Ok(TqlConfig::default());
    };
    let content = tokio::fs::read_to_string(&config_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", config_path, e))?;
    let config = TqlConfig::from_toml_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {:?}: {}", config_path, e))?;
    tracing::debug!(path = %config_path.display(), "loaded config");
    Ok(config)
}
