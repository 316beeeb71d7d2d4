use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "druglink")]
#[command(about = "Formulary search, ingredient translation and external drug resolution")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "DRUGLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Formulary dataset JSON (overrides engine.dataset_path)
    #[arg(short, long, global = true, env = "DRUGLINK_DATASET")]
    pub dataset: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// SQLite file holding the expansion cache
    #[arg(long, global = true, env = "DRUGLINK_STORE", default_value = "druglink-cache.sqlite")]
    pub store: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ranked search by brand, ingredient, drug class or ATC code
    Search(SearchArgs),
    /// Split an ingredient field into components
    Parse {
        /// Free-text ingredient field
        field: String,
    },
    /// International-name candidates for a local ingredient name
    Translate {
        name: String,
    },
    /// Canonical name for an ATC code
    Atc {
        code: String,
    },
    /// Resolve a formulary record against both external sources
    Resolve {
        record_id: String,
    },
    /// Look up a drug missing from the formulary in both external sources
    Lookup(LookupArgs),
    /// Inspect or reset the expansion cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Args)]
pub struct SearchArgs {
    pub query: String,
    /// Route of administration
    #[arg(long)]
    pub route: Option<String>,
    /// Prescription-only products only
    #[arg(long)]
    pub rx_only: bool,
    /// ATC code prefix
    #[arg(long)]
    pub atc: Option<String>,
    /// Marketed products only
    #[arg(long, conflicts_with = "withdrawn")]
    pub marketed: bool,
    /// Withdrawn (not marketed) products only
    #[arg(long)]
    pub withdrawn: bool,
    /// Maximum number of results
    #[arg(short, long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct LookupArgs {
    /// Brand or ingredient name
    pub term: String,
    /// Add the first match to the expansion cache
    #[arg(long)]
    pub adopt: bool,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cached external drugs, most recently used first
    List,
    /// Remove every cached external drug
    Clear,
}
