//! CLI command definitions and handlers.

pub mod dump;
mod fmt;
pub mod hist;
pub mod table;
pub mod tree;

use std::path::Path;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use crate::cache::backend::bin::BinBackend;
use crate::cache::{self, paths, Cache};
use crate::error::Error;
use crate::fingerprint;
use crate::git::config::{detect_supplemental_files, SupplementalFiles};
use crate::git::subprocess::LogFilters;
use crate::tally::TallyMode;

/// git-ledger tallies authorship: who edited what, when, and how much.
///
/// With no subcommand it prints the ranked author table.
#[derive(Parser, Debug)]
#[command(name = "git-ledger", version, about, args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub table: table::TableArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rank authors in a table
    Table(table::TableArgs),

    /// Annotate the file tree with its top contributors
    Tree(tree::TreeArgs),

    /// Plot a histogram of contributions over time
    Hist(hist::HistArgs),

    /// Print the parsed commit stream (debugging)
    #[command(hide = true)]
    Dump(dump::DumpArgs),
}

/// Revision and pathspec arguments shared by every subcommand.
#[derive(Args, Debug, Default, Clone)]
pub struct RevArgs {
    /// Revisions to tally (default: HEAD)
    #[arg(value_name = "REVISION")]
    pub revs: Vec<String>,

    /// Pathspecs limiting which files count, after "--"
    #[arg(last = true, value_name = "PATHSPEC")]
    pub pathspecs: Vec<String>,
}

impl RevArgs {
    pub fn revs_or_head(&self) -> Vec<String> {
        if self.revs.is_empty() {
            vec!["HEAD".to_string()]
        } else {
            self.revs.clone()
        }
    }
}

/// Ranking mode flags; at most one may be given.
#[derive(Args, Debug, Default, Clone)]
pub struct ModeArgs {
    /// Sort by lines added + removed
    #[arg(short = 'l', long, group = "mode")]
    pub lines: bool,

    /// Sort by files changed
    #[arg(short = 'f', long, group = "mode")]
    pub files: bool,

    /// Sort by time of last edit
    #[arg(long, group = "mode")]
    pub last_edit: bool,

    /// Sort by time of first edit
    #[arg(long, group = "mode")]
    pub first_edit: bool,
}

impl ModeArgs {
    pub fn mode(&self) -> TallyMode {
        if self.lines {
            TallyMode::Lines
        } else if self.files {
            TallyMode::Files
        } else if self.last_edit {
            TallyMode::LastModified
        } else if self.first_edit {
            TallyMode::FirstModified
        } else {
            TallyMode::Commits
        }
    }
}

/// Date and author filters passed through to git.
#[derive(Args, Debug, Default, Clone)]
pub struct FilterArgs {
    /// Only commits after this date (natural language ok)
    #[arg(long, value_name = "DATE")]
    pub since: Option<String>,

    /// Only commits before this date
    #[arg(long, value_name = "DATE")]
    pub until: Option<String>,

    /// Only commits by this author (repeatable)
    #[arg(long = "author", value_name = "AUTHOR")]
    pub authors: Vec<String>,

    /// Exclude commits by this author (repeatable)
    #[arg(long = "nauthor", value_name = "AUTHOR")]
    pub nauthors: Vec<String>,
}

impl FilterArgs {
    pub fn to_filters(&self) -> LogFilters {
        LogFilters {
            since: self.since.clone(),
            until: self.until.clone(),
            authors: self.authors.clone(),
            nauthors: self.nauthors.clone(),
        }
    }
}

/// Run the CLI with parsed arguments.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Table(args)) => table::run(&args),
        Some(Commands::Tree(args)) => tree::run(&args),
        Some(Commands::Hist(args)) => hist::run(&args),
        Some(Commands::Dump(args)) => dump::run(&args),
        // Default to the table, like running `git ledger` bare.
        None => table::run(&cli.table),
    }
}

/// Locate the repository and its supplemental config files.
pub(crate) fn repo_context() -> Result<(std::path::PathBuf, SupplementalFiles)> {
    let root = crate::git::get_root()?;
    let files = detect_supplemental_files(&root)?;
    Ok((root, files))
}

/// Build the cache handle for a repository. Failure to set up real storage
/// degrades to the noop cache with a warning; it never fails the command.
pub(crate) fn open_cache(root: &Path, files: &SupplementalFiles) -> Cache {
    if !cache::caching_enabled() {
        return Cache::noop();
    }

    let backend = paths::repo_cache_dir(root).and_then(|dir| {
        let fp = fingerprint::repo_state_fingerprint(files)?;
        Ok(BinBackend::new(dir, &fp))
    });

    match backend {
        Ok(backend) => Cache::new(Box::new(backend)),
        Err(err) => {
            warn!("caching disabled: {err:#}");
            Cache::noop()
        }
    }
}

/// Validate `-n/--limit`.
pub(crate) fn check_limit(limit: Option<usize>) -> Result<()> {
    if limit == Some(0) {
        return Err(Error::Usage("limit must be greater than zero".to_string()).into());
    }
    Ok(())
}
