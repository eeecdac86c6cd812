use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use harvest_core::{Category, OutputFormat};

/// Harvest the Atom feeds of a research information API into page and
/// record files.
#[derive(Debug, Parser)]
#[command(name = "feed-harvest", version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// YAML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Directory holding `feed/` and `raw-records/`
    #[arg(long, global = true, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,
    /// API base URL, e.g. https://elements.example.org:8091/secure-api/v5.5
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,
    /// Name of the stored login session
    #[arg(long, global = true, value_name = "NAME")]
    pub session: Option<String>,
    /// Log what would be fetched without fetching or writing anything
    #[arg(long, global = true)]
    pub dry_run: bool,
    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
    /// Also write the log to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch the feeds of the given categories into `feed/`
    Feed {
        #[arg(required = true, value_name = "CATEGORY")]
        categories: Vec<Category>,
    },
    /// Split saved pages into one file per record under `raw-records/`
    #[command(name = "feed.split", alias = "feed-split")]
    FeedSplit {
        #[arg(required = true, value_name = "CATEGORY")]
        categories: Vec<Category>,
    },
    /// Close a set of seed groups over a groups feed
    #[command(name = "group.sub", alias = "group-sub")]
    GroupSub(GroupSubArgs),
    /// Check credentials against the API and store them as a session
    Login {
        #[arg(long)]
        username: String,
        /// Read from standard input when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Issue one authenticated GET and print or save the body
    Get {
        /// API path relative to the base URL, or an absolute URL
        target: String,
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct GroupSubArgs {
    /// Groups feed page(s), read as one feed
    #[arg(long = "input", required = true, num_args = 1.., value_name = "FILE")]
    pub inputs: Vec<PathBuf>,
    /// Seed group ids; comma-separated and repeatable
    #[arg(long, required = true, value_name = "IDS")]
    pub seeds: Vec<String>,
    /// Add the ancestors of every seed
    #[arg(long)]
    pub parents: bool,
    /// Add the descendants of every seed
    #[arg(long)]
    pub children: bool,
    #[arg(long, value_enum, default_value_t = FormatArg::Ids)]
    pub format: FormatArg,
    /// Output file; a directory when several feed pages are filtered
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,
    /// Fail when a group has more than one parent instead of warning
    #[arg(long)]
    pub reject_multi_parent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Ids,
    Feed,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Ids => OutputFormat::Ids,
            FormatArg::Feed => OutputFormat::Feed,
        }
    }
}
