use anyhow::Result;
use clap::{Parser, Subcommand};
use parley_infrastructure::{ConfigService, ParleyPaths};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod demo;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley CLI - chat sessions with live document edits", long_about = None)]
struct Cli {
    /// Config file to use instead of <config dir>/parley/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep config and data under this directory
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message and stream the reply
    Chat {
        message: String,

        /// Continue a live or persisted session
        #[arg(long)]
        session: Option<String>,
    },
    /// Replace text in a file through a live edit session
    Edit {
        /// File path relative to the workspace
        file: String,
        find: String,
        replace: String,

        #[arg(long, default_value = ".")]
        workspace: PathBuf,

        /// Keep the edits and save the file (otherwise preview and revert)
        #[arg(long)]
        keep: bool,

        /// Apply every change at once instead of typing it out
        #[arg(long)]
        instant: bool,
    },
    /// Manage persisted sessions
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List persisted sessions, most recent first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove one persisted session
    Remove { session_id: String },
    /// Remove every persisted session
    Clear,
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = ParleyPaths::new(cli.root);
    let config = match &cli.config {
        Some(path) => ConfigService::load_or_create(path)?,
        None => ConfigService::new(paths.clone()).get_config(),
    };
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Chat { message, session } => {
            let service = commands::context::chat_service(&config, &paths).await?;
            commands::chat::run(&service, &message, session).await?
        }
        Commands::Edit {
            file,
            find,
            replace,
            workspace,
            keep,
            instant,
        } => {
            let options = commands::edit::EditOptions {
                workspace,
                file,
                find,
                replace,
                keep,
                instant,
            };
            commands::edit::run(&config, options).await?
        }
        Commands::History { action } => {
            let service = commands::context::chat_service(&config, &paths).await?;
            match action {
                HistoryAction::List { json } => commands::history::list(&service, json).await?,
                HistoryAction::Remove { session_id } => {
                    commands::history::remove(&service, &session_id).await?
                }
                HistoryAction::Clear => commands::history::clear(&service).await?,
            }
        }
    }

    Ok(())
}
