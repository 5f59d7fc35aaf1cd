//! # pdfchat CLI
//!
//! The `pdfchat` binary runs the HTTP server and exposes the same workspace,
//! upload, embedding and chat operations from the command line.
//!
//! ## Usage
//!
//! ```bash
//! pdfchat --config ./config/pdfchat.toml [--user <id>] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pdfchat init` | Create the SQLite database and run schema migrations |
//! | `pdfchat serve` | Start the HTTP server |
//! | `pdfchat token <user>` | Mint a bearer token for a user |
//! | `pdfchat workspace create/list/delete` | Manage workspaces |
//! | `pdfchat upload <ws> <file.pdf>` | Upload (and index) a PDF |
//! | `pdfchat embed <doc>` | Re-chunk and embed a document |
//! | `pdfchat ask <ws> "<question>"` | Ask a question about a workspace |
//! | `pdfchat similar <ws> "<text>"` | Find documents similar to a text |
//! | `pdfchat completions <shell>` | Print shell completions |

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pdfchat::{auth, chat, config, duplicates, embed_cmd, ingest, migrate, server, workspace};

/// pdfchat: multi-tenant PDF workspaces with retrieval-augmented chat.
#[derive(Parser)]
#[command(name = "pdfchat", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pdfchat.toml")]
    config: PathBuf,

    /// User id to act as for workspace, upload and chat commands.
    #[arg(long, global = true)]
    user: Option<String>,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Mint a session token for `user_id`.
    Token { user_id: String },

    /// Manage workspaces.
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },

    /// Upload a PDF into a workspace.
    ///
    /// Text is extracted on the server; pages carry no raster. The document
    /// is embedded right away when an embedding provider is configured.
    Upload {
        workspace_id: String,
        file: PathBuf,

        /// Document title. Defaults to the file name.
        #[arg(long)]
        title: Option<String>,
    },

    /// Re-chunk and embed one document.
    Embed { document_id: String },

    /// Ask a question about a workspace's documents.
    Ask {
        workspace_id: String,
        message: String,
    },

    /// List documents whose pages resemble `text`.
    Similar {
        workspace_id: String,
        text: String,

        #[arg(long, default_value_t = duplicates::DEFAULT_MIN_SIMILARITY)]
        min_similarity: f64,
    },

    /// Print shell completions.
    Completions { shell: clap_complete::Shell },
}

#[derive(Subcommand)]
enum WorkspaceAction {
    Create { name: String },
    List,
    Delete { workspace_id: String },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn require_user(user: &Option<String>) -> anyhow::Result<&str> {
    user.as_deref()
        .filter(|u| !u.trim().is_empty())
        .context("--user <id> is required for this command")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "pdfchat", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Token { user_id } => {
            let secret = cfg.server.resolve_session_secret()?;
            println!("{}", auth::mint_token(&secret, &user_id)?);
        }
        Commands::Workspace { action } => {
            let user = require_user(&cli.user)?;
            match action {
                WorkspaceAction::Create { name } => workspace::run_create(&cfg, user, &name).await?,
                WorkspaceAction::List => workspace::run_list(&cfg, user).await?,
                WorkspaceAction::Delete { workspace_id } => {
                    workspace::run_delete(&cfg, user, &workspace_id).await?
                }
            }
        }
        Commands::Upload {
            workspace_id,
            file,
            title,
        } => {
            let user = require_user(&cli.user)?;
            ingest::run_upload(&cfg, user, &workspace_id, &file, title).await?;
        }
        Commands::Embed { document_id } => {
            let user = require_user(&cli.user)?;
            embed_cmd::run_embed(&cfg, user, &document_id).await?;
        }
        Commands::Ask {
            workspace_id,
            message,
        } => {
            let user = require_user(&cli.user)?;
            chat::run_ask(&cfg, user, &workspace_id, &message).await?;
        }
        Commands::Similar {
            workspace_id,
            text,
            min_similarity,
        } => {
            let user = require_user(&cli.user)?;
            duplicates::run_similar(&cfg, user, &workspace_id, &text, min_similarity).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
