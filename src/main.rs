//! # Archie CLI (`archie`)
//!
//! Loads arXiv papers into a vector collection, searches them, and chats
//! about them with a tool-calling model.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `archie load` | Query arXiv, embed the abstracts, and store the papers |
//! | `archie search "<query>"` | Print the papers closest to a query |
//! | `archie chat` | Interactive retrieval-augmented chat |
//!
//! ## Examples
//!
//! ```bash
//! # Load the 200 most recently updated cs.CL papers about agents
//! archie load --topic "LLM agents" --category cs.CL -n 200
//!
//! # Semantic search
//! archie search "retrieval augmented generation for code" --count 5
//!
//! # Chat, reading secrets from a custom env file
//! archie chat --env-file ./secrets.env
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use archie::config::{self, Config};
use archie::progress::ProgressMode;
use archie::search::DEFAULT_TOP;
use archie::{chat_cmd, ingest, search};

const DEFAULT_CONFIG_PATH: &str = "./config/archie.toml";

/// Archie: chat with the latest arXiv research.
///
/// Service credentials are read from the environment (`OPENAI_API_KEY`, or
/// `AZURE_OPENAI_API_KEY` and `AZURE_OPENAI_ENDPOINT`), optionally populated
/// from an env file.
#[derive(Parser)]
#[command(
    name = "archie",
    about = "Archie: load, search and chat with arXiv papers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/archie.toml`; built-in defaults are used when
    /// that file does not exist. See `config/archie.example.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Env file with service credentials. Skipped if missing.
    #[arg(short = 'e', long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Log level for stderr diagnostics. `RUST_LOG` takes precedence.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch papers from arXiv and load them into the collection.
    ///
    /// Papers are matched on the topic phrase within the category, newest
    /// updates first. Abstracts are embedded in batches and upserted by
    /// arXiv id, so loading the same papers twice never duplicates them.
    Load {
        /// Total number of papers to fetch.
        #[arg(short = 'n', long, default_value_t = 100)]
        num_papers: usize,

        /// Topic phrase to search arXiv for.
        #[arg(short, long, default_value = "RAG")]
        topic: String,

        /// arXiv category filter.
        #[arg(short, long, default_value = "cs.AI")]
        category: String,

        /// Progress output on stderr.
        #[arg(long, value_enum, default_value_t = ProgressMode::Human)]
        progress: ProgressMode,
    },

    /// Search the collection for papers related to a query.
    Search {
        /// Free-text query.
        query: String,

        /// Number of papers to return.
        #[arg(short = 'n', long, default_value_t = DEFAULT_TOP)]
        count: usize,
    },

    /// Chat with Archie about the papers in the collection.
    ///
    /// Enter an empty line, `exit`, Ctrl+C or Ctrl+D to leave.
    Chat,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_env_file(path: &Path) -> Result<()> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(anyhow::anyhow!(
            "Failed to read env file {}: {}",
            path.display(),
            e
        )),
    }
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                config::load_config(default_path)
            } else {
                tracing::debug!("no config file found, using defaults");
                Ok(Config::default())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    load_env_file(&cli.env_file)?;
    init_logging(&cli.log_level);
    let cfg = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Load {
            num_papers,
            topic,
            category,
            progress,
        } => {
            let reporter = progress.reporter();
            ingest::run_load(&cfg, &topic, &category, num_papers, reporter.as_ref()).await?;
        }
        Commands::Search { query, count } => {
            search::run_search(&cfg, &query, count).await?;
        }
        Commands::Chat => {
            chat_cmd::run_chat(&cfg).await?;
        }
    }

    Ok(())
}
