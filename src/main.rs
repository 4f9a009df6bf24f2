use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use codelore::config::{Config, LoggingConfig};

mod cli;

#[derive(Parser)]
#[command(name = "codelore")]
#[command(version)]
#[command(about = "Scoped knowledge store for AI coding sessions, linked to a local code index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Project directory
    #[arg(short, long, global = true, default_value = ".")]
    project: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdio (default command)
    Serve,

    /// Index the project's source files
    Index {
        /// Re-index every file even when its content is unchanged
        #[arg(short, long)]
        rebuild: bool,
    },

    /// Search indexed symbols
    Search {
        /// Name or fragment to look for
        query: String,

        /// Symbol kinds (comma-separated)
        #[arg(short, long)]
        kind: Option<String>,

        /// Only exported symbols
        #[arg(short, long)]
        exported: bool,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show index and scope statistics
    Stats,

    /// Store a knowledge entry
    Remember {
        /// Text to store
        content: String,

        /// Tags (repeatable)
        #[arg(short, long)]
        tag: Vec<String>,

        /// Scope: project, user or global
        #[arg(short, long, default_value = "project")]
        scope: String,

        /// File being edited when the entry was written
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Retrieve knowledge entries
    Recall {
        /// Search text; empty returns the most recent entries
        #[arg(default_value = "")]
        query: String,

        /// Tags to filter by (repeatable)
        #[arg(short, long)]
        tag: Vec<String>,

        /// Scope: project, user, global or all
        #[arg(short, long, default_value = "all")]
        scope: String,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// List supported languages
    Languages,
}

/// Logs go to stderr: stdout carries the MCP protocol when serving.
/// `RUST_LOG` wins over the flags, which win over the config file.
fn init_logging(debug: bool, verbose: bool, logging: &LoggingConfig) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match logging.format.as_str() {
        "pretty" => builder.pretty().init(),
        "full" => builder.init(),
        _ => builder.compact().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_project_dir(&cli.project);
    init_logging(cli.debug, cli.verbose, &config.logging);

    info!("Codelore v{} starting...", env!("CARGO_PKG_VERSION"));

    let project = cli.project;
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!("Starting MCP server for project: {}", project);
            cli::serve::serve_stdio(project).await?;
        }

        Commands::Index { rebuild } => {
            info!("Indexing project: {}", project);
            cli::index::index_project(project, rebuild).await?;
        }

        Commands::Search {
            query,
            kind,
            exported,
            limit,
        } => {
            cli::search::search_symbols(query, project, kind, exported, limit).await?;
        }

        Commands::Stats => {
            cli::stats::show_stats(project, cli.verbose).await?;
        }

        Commands::Remember {
            content,
            tag,
            scope,
            file,
        } => {
            cli::memory::remember(content, tag, scope, file, project).await?;
        }

        Commands::Recall {
            query,
            tag,
            scope,
            limit,
        } => {
            cli::memory::recall(query, tag, scope, limit, project).await?;
        }

        Commands::Languages => {
            cli::languages::list_languages();
        }
    }

    Ok(())
}
