//! # Shelfwise CLI (`shelf`)
//!
//! ## Usage
//!
//! ```bash
//! shelf --config ./config/shelf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shelf init` | Create the SQLite database and run schema migrations |
//! | `shelf import <file>` | Validate and load seed records |
//! | `shelf schema` | Print the collection schemas shown to the model |
//! | `shelf plan "<question>"` | Show classification and prompt, no model call |
//! | `shelf check "<query>"` | Sanitize, parse and validate a candidate offline |
//! | `shelf ask "<question>"` | Answer an admin question end to end |
//! | `shelf serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! shelf init --config ./config/shelf.toml
//! shelf import ./data/seed.json
//! shelf check 'db.users.find({role: "Student"}, {name: 1})'
//! GROQ_API_KEY=... shelf ask "which students have pending requests?"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use shelfwise::{cli, config, migrate, server, store};

/// Shelfwise: natural-language admin queries over library records.
///
/// Commands that touch the database or the model read a TOML
/// configuration file given by `--config`.
#[derive(Parser)]
#[command(
    name = "shelf",
    about = "Shelfwise: natural-language admin queries over library records",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/shelf.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Load seed records from a JSON file keyed by collection name.
    ///
    /// Every record is validated against the collection schema first; a
    /// file with any invalid record is rejected without writing anything.
    Import {
        /// Seed file path.
        file: PathBuf,
    },

    /// Print the collection schemas sent to the model.
    Schema,

    /// Show how a question would be classified and prompted.
    Plan {
        question: String,
    },

    /// Sanitize, parse and validate candidate query text without a model.
    Check {
        /// Candidate text, e.g. `db.users.find({}, {name: 1})`.
        candidate: String,

        /// Treat the question as multi-collection (find queries are rejected).
        #[arg(long)]
        multi: bool,
    },

    /// Answer an admin question against the record store.
    Ask {
        question: String,
    },

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    // Commands that don't require config
    match &args.command {
        Commands::Schema => return cli::run_schema().await,
        Commands::Check { candidate, multi } => return cli::run_check(candidate, *multi),
        _ => {}
    }

    let cfg = config::load_config(&args.config)?;

    match args.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            store::run_import(&cfg, &file).await?;
        }
        Commands::Plan { question } => {
            cli::run_plan(&cfg, &question).await?;
        }
        Commands::Ask { question } => {
            cli::run_ask(&cfg, &question).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Schema | Commands::Check { .. } => {}
    }

    Ok(())
}
