use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ghg",
    about = "Versioned greenhouse-gas time-series store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// User configuration file (default: $HOME/.ghg/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store name from the user configuration, or a store path
    #[arg(short, long, global = true)]
    pub store: Option<String>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a new store
    Init(InitArgs),
    /// Register a store path in the user configuration
    AddStore(AddStoreArgs),
    /// List stores in the user configuration
    Stores,
    /// Check payload and metadata consistency
    Check(CheckArgs),
    /// Search metadata records
    Search(SearchArgs),
    /// Show one series
    Info(InfoArgs),
    /// Permanently delete a series
    Delete(DeleteArgs),
}

#[derive(Args)]
pub struct InitArgs {
    pub path: PathBuf,
    /// Also register the store under this name
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct AddStoreArgs {
    pub name: String,
    pub path: PathBuf,
    /// Make this the default store
    #[arg(long)]
    pub default: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Remove orphaned folders and unreferenced chunks
    #[arg(long)]
    pub prune: bool,
}

#[derive(Args)]
pub struct SearchArgs {
    /// Filters: key=value, key!=value (present and different), key=a,b (any of),
    /// key=lo..hi (range), or key (exists)
    pub filters: Vec<String>,
    /// Restrict to one data kind
    #[arg(short, long)]
    pub kind: Option<String>,
    /// Return records matching none of the filters
    #[arg(long)]
    pub not: bool,
    /// Search every store in the user configuration
    #[arg(long, conflicts_with = "not")]
    pub all_stores: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    pub series: String,
    #[arg(short, long, default_value = "surface")]
    pub kind: String,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub series: String,
    #[arg(short, long, default_value = "surface")]
    pub kind: String,
    /// Repeat the series id to confirm
    #[arg(long)]
    pub confirm: Option<String>,
}
