use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::llm::Backend;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub dry_run: bool,  // global --dry-run
}

#[derive(Parser)]
#[command(name = "mend")]
#[command(about = "Resolve merge conflicts with a language model and anchor-based splicing")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress progress spinners and non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Show what would be done without writing anything
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file (defaults to mendmerge.toml in the working directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List conflict regions with their context windows
    Extract(ExtractArgs),

    /// Resolve conflicts by querying a language model
    Resolve(ResolveArgs),

    /// Resolve a file from saved model replies, without a model
    Apply(ApplyArgs),

    /// Report leftover conflict markers
    Check(CheckArgs),

    /// Download review changes, resolve conflicts or rework review comments, optionally upload
    Review(ReviewArgs),

    /// Initialize a mendmerge.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Region extraction knobs shared by the resolving commands
#[derive(Args, Debug, Clone, Default)]
pub struct RegionArgs {
    /// Context lines around each conflict (overrides config)
    #[arg(long)]
    pub margin: Option<usize>,

    /// Merge conflicts whose context windows overlap
    #[arg(long)]
    pub merge_overlaps: bool,
}

#[derive(Parser)]
pub struct ExtractArgs {
    /// Files or directories to scan
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub region: RegionArgs,

    /// Output results in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ResolveArgs {
    /// Files or directories to resolve
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub region: RegionArgs,

    /// Model backend (overrides config)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Prompt JSON file (overrides config and the built-in prompts)
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// Retry budget for model queries and file passes (overrides config)
    #[arg(long)]
    pub retries: Option<usize>,

    /// Write resolved files back in place
    #[arg(long)]
    pub write: bool,

    /// Output results in JSON format (single line)
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Conflicted file to resolve
    pub file: PathBuf,

    /// Reply files, one per conflict region in file order
    #[arg(long = "reply", required = true)]
    pub replies: Vec<PathBuf>,

    #[command(flatten)]
    pub region: RegionArgs,

    /// Write the resolved file back in place
    #[arg(long)]
    pub write: bool,

    /// Output results in JSON format (single line)
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct CheckArgs {
    /// Files or directories to check
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Output results in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
#[command(group(ArgGroup::new("rework").args(["resolve", "comments"]).multiple(true)))]
pub struct ReviewArgs {
    /// SSH host of the review server
    #[arg(long, env = "GERRIT_HOST")]
    pub host: Option<String>,

    /// Branch to query
    #[arg(long, env = "GERRIT_BRANCH")]
    pub branch: Option<String>,

    /// Statuses to query, `|`-separated (e.g. merged|open)
    #[arg(long)]
    pub status: Option<String>,

    /// Query window: "N days ago", "N weeks ago", ... or YYYY-MM-DD
    #[arg(long)]
    pub since: Option<String>,

    /// Explicit change numbers (skips branch/status/since filtering)
    #[arg(long = "number")]
    pub numbers: Vec<String>,

    /// Where changes are downloaded, one directory per change
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Re-download changes that already exist locally
    #[arg(long)]
    pub renew: bool,

    /// Resolve conflicts in the downloaded changes
    #[arg(long)]
    pub resolve: bool,

    /// Rewrite the code around open inline comments of the current patch set
    #[arg(long)]
    pub comments: bool,

    /// Amend and push reworked changes back for review
    #[arg(long, requires = "rework")]
    pub upload: bool,

    #[command(flatten)]
    pub region: RegionArgs,

    /// Model backend (overrides config)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Prompt JSON file (overrides config and the built-in prompts)
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// Retry budget for model queries and file passes (overrides config)
    #[arg(long)]
    pub retries: Option<usize>,

    /// Output change records in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}

/// Command failure carrying the exit code it maps to.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0} file(s) still contain conflict markers")]
    Unresolved(usize),

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Vcs(anyhow::Error),

    #[error(transparent)]
    Internal(anyhow::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Unresolved(_) => 2,
            CliError::InvalidInput(_) => 3,
            CliError::Vcs(_) => 4,
            CliError::Internal(_) => 5,
        }
    }
}
