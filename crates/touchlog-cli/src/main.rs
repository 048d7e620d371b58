#![deny(unsafe_code)]

//! touchlog CLI: vault setup, indexing, search, diagnostics, and daemon control.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use touchlog_config::VaultConfig;
use touchlog_config::vault::{init_vault, resolve_vault};
use touchlog_core::build_info;
use touchlog_core::daemon::Daemon;
use touchlog_core::index::IndexBuilder;
use touchlog_core::ipc::IpcClient;
use touchlog_core::model::DiagnosticLevel;
use touchlog_core::query::{
    DiagnosticFilter, DiagnosticRecord, SearchQuery, SearchResult, execute_search,
    list_diagnostics,
};

/// touchlog: a local vault of linked notes.
#[derive(Parser)]
#[command(name = "touchlog", version = build_info::VERSION_LONG, about, long_about = None)]
struct Cli {
    /// Vault root. Defaults to the nearest directory above the current one
    /// that contains `.touchlog/`.
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialise a vault.
    Init {
        /// Type bundle to include (repeatable). Defaults to every bundle.
        #[arg(long = "bundle")]
        bundles: Vec<String>,
    },

    /// Manage the note index.
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },

    /// Search notes, e.g. `touchlog search type:note tag:rust match:any`.
    Search {
        /// Query terms (`type:`, `state:`, `tag:`, `match:`, `limit:`, `offset:`).
        query: Vec<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Inspect parse and link diagnostics stored in the index.
    Diagnostics {
        #[command(subcommand)]
        command: DiagnosticsCommands,
    },

    /// Control the background vault daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum IndexCommands {
    /// Rebuild the index from every note in the vault.
    Rebuild,
}

#[derive(Subcommand)]
enum DiagnosticsCommands {
    /// List diagnostics, e.g. `touchlog diagnostics list --level error`.
    List {
        /// Only this level (info, warn, error).
        #[arg(long)]
        level: Option<DiagnosticLevel>,

        /// Only this note (`type:key` or `key`).
        #[arg(long)]
        node: Option<String>,

        /// Only this diagnostic code, e.g. `UNRESOLVED_LINK`.
        #[arg(long)]
        code: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon in the background.
    Start,
    /// Stop the running daemon.
    Stop,
    /// Show whether the daemon is running.
    Status,
    /// Ask the running daemon to reindex specific note files.
    Reindex {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The detached daemon logs to its own file instead.
    if !Daemon::is_daemon_child() {
        let filter = match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Init { bundles } => cmd_init(cli.vault.as_deref(), &bundles).await,
        Commands::Index {
            command: IndexCommands::Rebuild,
        } => cmd_index_rebuild(&vault_root(cli.vault.as_deref())?).await,
        Commands::Search { query, format } => {
            cmd_search(&vault_root(cli.vault.as_deref())?, &query.join(" "), format).await
        }
        Commands::Diagnostics {
            command:
                DiagnosticsCommands::List {
                    level,
                    node,
                    code,
                    format,
                },
        } => {
            let filter = DiagnosticFilter { level, node, code };
            cmd_diagnostics_list(&vault_root(cli.vault.as_deref())?, &filter, format).await
        }
        Commands::Daemon { command } => {
            let vault = vault_root(cli.vault.as_deref())?;
            match command {
                DaemonCommands::Start => cmd_daemon_start(&vault).await,
                DaemonCommands::Stop => cmd_daemon_stop(&vault).await,
                DaemonCommands::Status => cmd_daemon_status(&vault),
                DaemonCommands::Reindex { paths } => cmd_daemon_reindex(&vault, &paths).await,
            }
        }
    }
}

fn vault_root(explicit: Option<&Path>) -> Result<PathBuf> {
    Ok(resolve_vault(explicit)?)
}

async fn cmd_init(explicit: Option<&Path>, bundles: &[String]) -> Result<()> {
    let root = match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().context("reading current directory")?,
    };
    let config = if bundles.is_empty() {
        VaultConfig::with_all_bundles()
    } else {
        VaultConfig::from_bundles(bundles)?
    };

    let paths = init_vault(&root, &config).await?;
    println!("Initialized vault at {}", paths.root.display());
    println!("Types: {}", config.type_names().collect::<Vec<_>>().join(", "));
    Ok(())
}

async fn cmd_index_rebuild(vault: &Path) -> Result<()> {
    let config = VaultConfig::load(vault).await?;
    let stats = IndexBuilder::new(vault, &config)
        .rebuild()
        .await
        .context("rebuilding index")?;
    println!(
        "Indexed {} notes ({} files, {} skipped), {} edges ({} unresolved), {} diagnostics",
        stats.notes,
        stats.files,
        stats.skipped,
        stats.edges,
        stats.unresolved_edges,
        stats.diagnostics
    );
    Ok(())
}

async fn cmd_search(vault: &Path, query: &str, format: OutputFormat) -> Result<()> {
    let parsed = SearchQuery::parse(query)?;

    let daemon = Daemon::new(vault)?;
    let results = if daemon.status().0 {
        debug!("searching through the daemon");
        IpcClient::new(daemon.socket_path()).query(query).await?
    } else {
        debug!("searching the index directly");
        execute_search(vault, &parsed).await?
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Table => print_table(&results),
    }
    Ok(())
}

fn print_table(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }

    let rows: Vec<[String; 5]> = results
        .iter()
        .map(|r| {
            [
                r.type_name.clone(),
                r.key.clone(),
                r.state.clone(),
                r.title.clone(),
                r.tags.join(","),
            ]
        })
        .collect();
    let header = ["TYPE", "KEY", "STATE", "TITLE", "TAGS"].map(String::from);

    let mut widths = header.clone().map(|h| h.len());
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    for row in std::iter::once(&header).chain(&rows) {
        let line: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect();
        println!("{}", line.join("  ").trim_end());
    }
}

async fn cmd_diagnostics_list(
    vault: &Path,
    filter: &DiagnosticFilter,
    format: OutputFormat,
) -> Result<()> {
    let diagnostics = list_diagnostics(vault, filter)
        .await
        .context("listing diagnostics")?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "schema_version": 1,
                "touchlog_version": build_info::VERSION,
                "count": diagnostics.len(),
                "diagnostics": diagnostics,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => print_diagnostics(&diagnostics),
    }
    Ok(())
}

fn print_diagnostics(diagnostics: &[DiagnosticRecord]) {
    if diagnostics.is_empty() {
        println!("No diagnostics found.");
        return;
    }

    let mut counts = Vec::new();
    for level in [DiagnosticLevel::Error, DiagnosticLevel::Warn, DiagnosticLevel::Info] {
        let group: Vec<_> = diagnostics.iter().filter(|d| d.level == level).collect();
        counts.push(group.len());
        if group.is_empty() {
            continue;
        }

        println!("{} ({}):", level.as_str().to_uppercase(), group.len());
        for d in group {
            println!("  [{}] {}", d.code, d.message);
            println!("    Node: {}", d.node_ref());
            if !d.span.path.is_empty() {
                println!("    Path: {} (bytes {}..{})", d.span.path, d.span.start_byte, d.span.end_byte);
            }
        }
        println!();
    }

    println!(
        "Summary: {} total ({} errors, {} warnings, {} info)",
        diagnostics.len(),
        counts[0],
        counts[1],
        counts[2]
    );
}

async fn cmd_daemon_start(vault: &Path) -> Result<()> {
    let mut daemon = Daemon::new(vault)?;
    if Daemon::is_daemon_child() {
        daemon.run().await?;
        return Ok(());
    }

    info!(vault = %vault.display(), "starting daemon");
    let pid = daemon.start().await?;
    println!("Daemon started (pid {pid})");
    Ok(())
}

async fn cmd_daemon_stop(vault: &Path) -> Result<()> {
    let mut daemon = Daemon::new(vault)?;
    daemon.stop().await?;
    println!("Daemon stopped");
    Ok(())
}

fn cmd_daemon_status(vault: &Path) -> Result<()> {
    let daemon = Daemon::new(vault)?;
    match daemon.status() {
        (true, pid) => {
            println!("Daemon running (pid {pid})");
            println!("Socket: {}", daemon.socket_path().display());
        }
        (false, _) => println!("Daemon not running"),
    }
    Ok(())
}

async fn cmd_daemon_reindex(vault: &Path, paths: &[PathBuf]) -> Result<()> {
    let paths = paths
        .iter()
        .map(|p| {
            std::path::absolute(p)
                .map(|abs| abs.display().to_string())
                .with_context(|| format!("resolving {}", p.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let requested = paths.len();

    let processed = IpcClient::for_vault(vault).reindex(paths).await?;
    println!("Reindexed {processed} of {requested} paths");
    Ok(())
}
