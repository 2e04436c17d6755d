//! # Research Brief CLI (`brief`)
//!
//! ## Usage
//!
//! ```bash
//! brief --config ./config/brief.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `brief init` | Create the corpus schema and seed the coverage universe |
//! | `brief counts` | Rebuild the company mention counts from chunk text |
//! | `brief ask "<question>"` | Answer a question against the local corpus |
//! | `brief expand --doc-id N "<bullet>"` | Expand one bullet against one document |
//! | `brief serve` | Start the job broker |
//! | `brief work` | Start a worker pulling from the broker |
//! | `brief companies` | List the coverage universe |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use research_brief::{commands, config, counts, migrate, server, worker};

/// Research Brief: citation-linked answers over company reports.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/brief.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "brief", version, about = "Citation-linked research briefs over company reports")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/brief.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the corpus schema and seed the company reference tables.
    ///
    /// Idempotent: existing tables and companies are left untouched.
    Init,

    /// Rebuild the per-document company mention counts from chunk text.
    ///
    /// Run after ingesting documents; questions about covered companies
    /// rank from these counts.
    Counts,

    /// Answer a question in-process and print the brief.
    Ask {
        /// The question, e.g. "JBH outlook on gross margins".
        question: String,

        /// Print the full result payload as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Expand one bullet against a single document.
    Expand {
        /// Document to ground the expansion in.
        #[arg(long)]
        doc_id: i64,

        /// The bullet text to expand.
        bullet: String,

        /// The question the bullet originally answered.
        #[arg(long)]
        parent_query: Option<String>,

        /// Print the full result payload as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the job broker on `[broker].bind`.
    Serve,

    /// Start a worker polling `[worker].broker_url`.
    Work,

    /// List the coverage universe (tickers, legal names, aliases).
    Companies,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("research_brief=info,brief=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let seeded = migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully ({} companies seeded).", seeded);
        }
        Commands::Counts => {
            let summary = counts::run_counts(&cfg).await?;
            println!(
                "Counted {} documents: {} company rows ({}).",
                summary.documents,
                summary.rows,
                if summary.linked { "document_company links" } else { "full scan" }
            );
        }
        Commands::Ask { question, json } => {
            commands::run_ask(&cfg, &question, json).await?;
        }
        Commands::Expand {
            doc_id,
            bullet,
            parent_query,
            json,
        } => {
            commands::run_expand(&cfg, doc_id, &bullet, parent_query.as_deref(), json).await?;
        }
        Commands::Serve => {
            server::run_broker(&cfg).await?;
        }
        Commands::Work => {
            let pipeline = commands::build_pipeline(&cfg).await?;
            worker::run_worker(&cfg, pipeline).await?;
        }
        Commands::Companies => {
            commands::list_companies(&cfg);
        }
    }

    Ok(())
}
