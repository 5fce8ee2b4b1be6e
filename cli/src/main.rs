//! `polyglot`: run one semantic query against a language server and print
//! the result as JSON.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use polyglot_config::PolyglotConfig;
use polyglot_lsp::protocol::file_uri_to_path;
use polyglot_lsp::{Connection, LanguageAdapter};
use serde_json::{Value, json};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Checked before `RUST_LOG`.
const LOG_ENV: &str = "POLYGLOT_LOG";

#[derive(Parser, Debug)]
#[command(name = "polyglot", version)]
#[command(about = "Query a language server from the command line")]
struct Cli {
    /// Config file (default: $POLYGLOT_CONFIG or ~/.polyglot/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// Language server to use (`qml` or a `[servers.*]` entry)
    #[arg(long, short, global = true, default_value = "qml")]
    language: String,
    /// Repository root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Document symbols of FILE (absolute or relative to --root)
    Symbols { file: PathBuf },
    /// Definition of the symbol at LINE:COLUMN (0-based)
    Definition {
        file: PathBuf,
        line: u32,
        column: u32,
    },
    /// References to the symbol at LINE:COLUMN (0-based)
    References {
        file: PathBuf,
        line: u32,
        column: u32,
        #[arg(long)]
        include_declaration: bool,
    },
    /// Workspace-wide symbol search
    WorkspaceSymbols { query: String },
    /// Directory, file and symbol tree of the whole repository
    Tree,
    /// Check that the language server can be launched
    Probe,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Logs never go to stdout: it carries the JSON result.
fn init_tracing(log_file: Option<&Path>) {
    let mut warning = None;
    if let Some(path) = log_file {
        match open_log_file(path) {
            Ok(file) => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                    .with(env_filter())
                    .init();
                tracing::info!(path = %path.display(), "Logging initialized");
                return;
            }
            Err(e) => warning = Some(format!("Failed to open log file {}: {e}", path.display())),
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter())
        .init();
    if let Some(warning) = warning {
        tracing::warn!("{warning}");
    }
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn load_config(path: Option<&Path>) -> Result<PolyglotConfig> {
    let config = match path {
        Some(path) => PolyglotConfig::load_from(path),
        None => PolyglotConfig::load(),
    };
    config.context("loading configuration")
}

async fn probe(adapter: Arc<dyn LanguageAdapter>, root: PathBuf) -> Result<Value> {
    let name = adapter.name().to_string();
    let spec = tokio::task::spawn_blocking(move || adapter.launch_spec(&root))
        .await
        .context("probe task failed")?
        .with_context(|| format!("{name} language server is not available"))?;
    Ok(json!({
        "language": name,
        "available": true,
        "command": spec.display_command(),
        "cwd": spec.cwd().display().to_string(),
    }))
}

/// Add a local `path` next to every `file://` uri in a list of locations.
fn with_local_paths(mut locations: Value) -> Value {
    if let Value::Array(items) = &mut locations {
        for item in items {
            let path = item
                .get("uri")
                .and_then(Value::as_str)
                .and_then(file_uri_to_path);
            if let (Some(path), Value::Object(fields)) = (path, item) {
                fields.insert("path".into(), json!(path.display().to_string()));
            }
        }
    }
    locations
}

async fn query(connection: &Connection, command: Commands) -> Result<Value> {
    let value = match command {
        Commands::Symbols { file } => serde_json::to_value(connection.document_symbols(&file).await?)?,
        Commands::Definition { file, line, column } => {
            with_local_paths(serde_json::to_value(connection.definition(&file, line, column).await?)?)
        }
        Commands::References {
            file,
            line,
            column,
            include_declaration,
        } => with_local_paths(serde_json::to_value(
            connection
                .references(&file, line, column, include_declaration)
                .await?,
        )?),
        Commands::WorkspaceSymbols { query } => {
            serde_json::to_value(connection.workspace_symbols(&query).await?)?
        }
        Commands::Tree => serde_json::to_value(connection.full_symbol_tree().await?)?,
        Commands::Probe => anyhow::bail!("probe does not run against a live server"),
    };
    Ok(value)
}

async fn run(cli: Cli) -> Result<Value> {
    let config = load_config(cli.config.as_deref())?;
    let adapter = config.adapter(&cli.language)?;

    if cli.command == Commands::Probe {
        let root = fs::canonicalize(&cli.root)
            .with_context(|| format!("resolving repository root {}", cli.root.display()))?;
        return probe(adapter, root).await;
    }

    let connection = Connection::start(adapter, &cli.root, config.client_options())
        .await
        .with_context(|| format!("starting {} language server in {}", cli.language, cli.root.display()))?;
    let result = query(&connection, cli.command).await;
    connection.shutdown().await;
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref());

    let value = run(cli).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
