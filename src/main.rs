//! Cellcurate - Classification Engine for Spike-Sorted Neural Units
//!
//! Command-line front end: resolve active subsets, inspect connectivity,
//! assign classifications and manage per-session backups.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::graph::GraphArgs;
use cli::helpers::FilterArgs;
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "cellcurate")]
#[command(about = "Classification and connectivity curation for spike-sorted units", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ~/.config/cellcurate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Set log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the active subset of a dataset
    Subset {
        /// Dataset JSON file
        #[arg(short, long)]
        dataset: PathBuf,

        #[command(flatten)]
        filters: FilterArgs,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show connectivity of a focused cell within the active subset
    Graph {
        /// Dataset JSON file
        #[arg(short, long)]
        dataset: PathBuf,

        /// Focused cell index
        #[arg(long)]
        focus: Option<usize>,

        /// Display mode (none, selected, upstream, downstream, up-and-downstream, all)
        #[arg(short, long)]
        mode: Option<String>,

        /// Polarities to follow (excitatory, inhibitory, both)
        #[arg(short, long)]
        polarity: Option<String>,

        /// Hop limit for closures
        #[arg(long)]
        max_hops: Option<usize>,

        #[command(flatten)]
        filters: FilterArgs,

        /// Output format (text, json, dot)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Assign a classification field on cells and save touched sessions
    Classify {
        /// Dataset JSON file
        #[arg(short, long)]
        dataset: PathBuf,

        /// Cells to edit, e.g. 1,4,7-9
        #[arg(short, long)]
        cells: String,

        /// Field (cellType, tags, brainRegion, label, deepSuperficial, groundTruthClassification)
        #[arg(short, long)]
        field: String,

        /// New value, or the member to add/remove for set-valued fields
        value: String,

        /// add or remove (set-valued fields only)
        #[arg(long)]
        op: Option<String>,

        /// Apply without saving
        #[arg(long)]
        dry_run: bool,
    },

    /// List stored backups of a session
    Backups {
        /// Session name
        session: String,
    },

    /// Restore a session from a backup and save it
    Restore {
        /// Dataset JSON file
        #[arg(short, long)]
        dataset: PathBuf,

        /// Session name
        session: String,

        /// Backup identifier (see `cellcurate backups`)
        backup: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let level = level.as_str().to_lowercase();
    let filter = EnvFilter::new(format!("cellcurate={},cellcurate_core={}", level, level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Write logs to stderr, not stdout
        .init();

    debug!("Cellcurate v{} starting...", env!("CARGO_PKG_VERSION"));
    let config = cli::helpers::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Subset {
            dataset,
            filters,
            format,
        } => cli::subset::handle(&dataset, &filters, &format, &config),
        Commands::Graph {
            dataset,
            focus,
            mode,
            polarity,
            max_hops,
            filters,
            format,
        } => {
            let args = GraphArgs {
                focus,
                mode,
                polarity,
                max_hops,
                format,
            };
            cli::graph::handle(&dataset, &filters, &args, &config)
        }
        Commands::Classify {
            dataset,
            cells,
            field,
            value,
            op,
            dry_run,
        } => {
            let args = cli::classify::ClassifyArgs {
                cells,
                field,
                value,
                op,
                dry_run,
            };
            cli::classify::handle(&dataset, &args, &config)
        }
        Commands::Backups { session } => cli::backups::handle(&session, &config),
        Commands::Restore {
            dataset,
            session,
            backup,
        } => cli::restore::handle(&dataset, &session, &backup, &config),
    }
}
