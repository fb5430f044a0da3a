//! # Code Wiki CLI (`wiki`)
//!
//! ## Usage
//!
//! ```bash
//! wiki --config ./config/wiki.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wiki init` | Create the SQLite database and run schema migrations |
//! | `wiki analyze <repo>` | Generate (or regenerate) the wiki for a repository |
//! | `wiki status [repo]` | Show analysis status |
//! | `wiki topics <repo>` | List generated pages |
//! | `wiki page <repo> <slug>` | Print one page |
//! | `wiki search <repo> "<query>"` | Search pages and passages |
//! | `wiki ask <repo> "<question>"` | Answer a question from the wiki |
//! | `wiki completions <shell>` | Print shell completions |
//!
//! `<repo>` is `owner/name` or a `https://github.com/owner/name` URL.
//!
//! Logs go to stderr; `RUST_LOG` controls the level (default `info`).

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codewiki::progress::ProgressMode;
use codewiki::{analyze, config, migrate, pages, search};

/// Code Wiki: citation-backed documentation and search for source
/// repositories.
#[derive(Parser)]
#[command(
    name = "wiki",
    about = "Generate a searchable, citation-backed wiki for a source repository",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/wiki.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Analyze a repository and generate its wiki.
    ///
    /// Re-running replaces the previous pages and passages.
    Analyze {
        repo: String,

        /// Progress on stderr: human, json, or off. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show analysis status for one or all repositories.
    Status {
        repo: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// List the pages generated for a repository.
    Topics { repo: String },

    /// Print one page by slug.
    Page {
        repo: String,
        slug: String,

        #[arg(long)]
        json: bool,
    },

    /// Search pages by title and passages by meaning.
    Search {
        repo: String,
        query: String,

        #[arg(long, default_value = "10")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Ask a question answered from the repository's wiki.
    Ask {
        repo: String,
        question: String,

        /// Slug of the page currently being read, added to the context.
        #[arg(long)]
        page: Option<String>,
    },

    /// Print shell completions.
    Completions { shell: Shell },
}

fn init_tracing(json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt)
            .init();
    }
}

fn parse_progress(value: Option<&str>) -> anyhow::Result<ProgressMode> {
    Ok(match value {
        None => ProgressMode::default_for_tty(),
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some("off") => ProgressMode::Off,
        Some(other) => anyhow::bail!("Unknown progress mode: {} (expected human, json, off)", other),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let load = || config::load_config(&cli.config);

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "wiki", &mut std::io::stdout());
        }
        Commands::Init => {
            migrate::run_migrations(&load()?).await?;
            println!("Database initialized successfully.");
        }
        Commands::Analyze { repo, progress } => {
            let mode = parse_progress(progress.as_deref())?;
            analyze::run_analyze(&load()?, &repo, mode).await?;
        }
        Commands::Status { repo, json } => {
            pages::show_status(&load()?, repo.as_deref(), json).await?;
        }
        Commands::Topics { repo } => {
            pages::list_topics(&load()?, &repo).await?;
        }
        Commands::Page { repo, slug, json } => {
            pages::show_page(&load()?, &repo, &slug, json).await?;
        }
        Commands::Search {
            repo,
            query,
            limit,
            json,
        } => {
            search::run_search(&load()?, &repo, &query, limit, json).await?;
        }
        Commands::Ask {
            repo,
            question,
            page,
        } => {
            search::run_ask(&load()?, &repo, &question, page.as_deref()).await?;
        }
    }

    Ok(())
}
