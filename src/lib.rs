//! **mendmerge** - Merge conflict resolution driven by a language model
//!
//! Conflict regions are extracted with a context margin, sent to a model, and
//! the replies are spliced back by anchoring on the surrounding lines, so an
//! imprecise reply never corrupts code outside the conflict.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Model backends behind one query capability
pub mod llm;

/// Conflict engine - extraction, anchoring, diff application and orchestration
pub mod core {
    /// Marker detection and margin-expanded region extraction
    pub mod conflict;
    pub use conflict::{ConflictRegion, MarkerSet, SpliceInfo};

    /// Anchor-based splicing of replacements into a buffer
    pub mod anchor;
    pub use anchor::{AnchorMatcher, SpliceOutcome};

    /// Header-less unified diff application
    pub mod diff_apply;
    pub use diff_apply::apply_true_diff;

    /// Model replies reduced to literal or diff candidates
    pub mod candidate;
    pub use candidate::ReplacementCandidate;

    /// Per-file orchestration and the resolve/apply commands
    pub mod resolve;
    pub use resolve::{ResolutionOrchestrator, run as resolve_run, run_apply as apply_run};

    /// Prompted model queries with validation and retries
    pub mod solver;
    pub use solver::{MergeConflictSolver, PromptSet, UploadChecker};

    /// Extract and check commands
    pub mod scan;
    pub use scan::{run_check as check_run, run_extract as extract_run};

    /// Thin wrappers over the git executable
    pub mod git;

    /// Model rewrites of code windows named by review comments
    pub mod comments;

    /// Gerrit query, download and upload
    pub mod review;
    pub use review::run as review_run;
}

/// Infrastructure - Configuration, I/O, discovery and logging
pub mod infra {
    /// Configuration management with TOML files and environment overrides
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Line-ending aware file I/O with memory mapping for large files
    pub mod io;
    pub use io::{read_lines, write_lines};

    /// Gitignore-aware discovery of conflicted files
    pub mod walk;
    pub use walk::FileWalker;

    /// tracing subscriber setup
    pub mod logging;
}

// Strategic re-exports for clean CLI interface
pub use cli::{AppContext, Cli, CliError, Commands};
pub use core::{apply_run, check_run, extract_run, resolve_run, review_run};
pub use infra::{Config, load_config};
