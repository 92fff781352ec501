//! Entry points of the tally engine.
//!
//! Each operation (flat table, tree, timeline) picks between the parallel
//! fan-out engine and a straight sequential pipe. Parallelism only pays
//! when diffs are involved: without `--numstat` a single `git log` is
//! plenty fast, and the sequential path also sidesteps the cache entirely.

pub mod concurrent;

use std::collections::HashSet;
use std::thread;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cache::Cache;
use crate::error::Error;
use crate::git::config::SupplementalFiles;
use crate::git::parse::parse_commits;
use crate::git::pathspec::Pathspecs;
use crate::git::subprocess::{self, LogFilters};
use crate::git::{self, Commit};
use crate::tally::bucket::{self, TimeBucket, TimeSeries};
use crate::tally::path::{self, TalliesByPath};
use crate::tally::tree::{self, TreeNode};
use crate::tally::{rank, FinalTally, TallyOpts};

/// One query over repository history.
#[derive(Debug, Clone, Default)]
pub struct QueryOpts {
    pub revs: Vec<String>,
    pub pathspecs: Vec<String>,
    pub filters: LogFilters,
    pub tally: TallyOpts,
    pub show_progress: bool,
}

fn parallelism() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn ignore_set(files: &SupplementalFiles) -> Result<HashSet<String>> {
    Ok(files.ignore_revs()?.into_iter().collect())
}

/// Ranked per-author totals for the flat table.
pub fn tally_commits(
    query: &QueryOpts,
    files: &SupplementalFiles,
    mut cache: Cache,
) -> Result<Vec<FinalTally>> {
    let opts = query.tally;
    let need_diffs = opts.mode.needs_diffs();

    let tallies = if need_diffs && parallelism() > 1 {
        let worktree = git::working_tree_files(&query.pathspecs)?;
        let by_path = concurrent::tally(
            query,
            &ignore_set(files)?,
            files.has_mailmap(),
            &mut cache,
            concurrent::TallyOp {
                tally_fn: |commits: &mut dyn Iterator<Item = Result<Commit>>| {
                    path::tally_by_path(commits, &opts)
                },
                combine: TalliesByPath::combine,
            },
        )?;
        by_path.reduce(Some(&worktree))
    } else {
        let worktree = if need_diffs {
            Some(git::working_tree_files(&query.pathspecs)?)
        } else {
            None
        };
        tally_sequential(query, files, need_diffs, |commits| {
            path::tally_commits(commits, worktree.as_ref(), &opts)
        })?
    };

    Ok(rank(tallies, opts.mode))
}

/// A ranked tree mirroring the working directory.
pub fn tally_commits_tree(
    query: &QueryOpts,
    files: &SupplementalFiles,
    mut cache: Cache,
) -> Result<TreeNode> {
    let opts = query.tally;
    let worktree = git::working_tree_files(&query.pathspecs)?;

    let by_path = if parallelism() > 1 {
        concurrent::tally(
            query,
            &ignore_set(files)?,
            files.has_mailmap(),
            &mut cache,
            concurrent::TallyOp {
                tally_fn: |commits: &mut dyn Iterator<Item = Result<Commit>>| {
                    path::tally_by_path(commits, &opts)
                },
                combine: TalliesByPath::combine,
            },
        )?
    } else {
        tally_sequential(query, files, true, |commits| {
            path::tally_by_path(commits, &opts)
        })?
    };

    let root = tree::build_tree(by_path, &worktree)?;
    Ok(root.rank(opts.mode))
}

/// Dense, ranked time buckets for the histogram.
///
/// `end` caps the series: "now" when the range runs to the tip, otherwise
/// the last commit's date is used.
pub fn tally_commits_timeline(
    query: &QueryOpts,
    files: &SupplementalFiles,
    mut cache: Cache,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<TimeBucket>> {
    let opts = query.tally;
    if !matches!(
        opts.mode,
        crate::tally::TallyMode::Commits
            | crate::tally::TallyMode::Lines
            | crate::tally::TallyMode::Files
    ) {
        return Err(Error::Usage(
            "timeline does not support ranking by edit time".to_string(),
        )
        .into());
    }

    let need_diffs = opts.mode.needs_diffs();

    let series = if need_diffs && parallelism() > 1 {
        concurrent::tally(
            query,
            &ignore_set(files)?,
            files.has_mailmap(),
            &mut cache,
            concurrent::TallyOp {
                tally_fn: |commits: &mut dyn Iterator<Item = Result<Commit>>| {
                    bucket::tally_commits_timeline(commits, &opts)
                },
                combine: TimeSeries::combine,
            },
        )?
    } else {
        tally_sequential(query, files, need_diffs, |commits| {
            bucket::tally_commits_timeline(commits, &opts)
        })?
    };

    Ok(bucket::into_buckets(series, end, opts.mode))
}

/// The straight pipe: one `git log`, one pass, no cache.
fn tally_sequential<T, F>(
    query: &QueryOpts,
    files: &SupplementalFiles,
    need_diffs: bool,
    tally_fn: F,
) -> Result<T>
where
    F: FnOnce(&mut dyn Iterator<Item = Result<Commit>>) -> Result<T>,
{
    // Fail fast on bad pathspecs even though git does the diff limiting on
    // this path.
    let _ = Pathspecs::parse(&query.pathspecs)?;

    let ignored = ignore_set(files)?;
    debug!(ignored = ignored.len(), "tallying sequentially");

    let mut sub = subprocess::run_log(
        &query.revs,
        &query.pathspecs,
        &query.filters,
        need_diffs,
        files.has_mailmap(),
    )?;

    let fields = sub.stdout_fields()?;
    let mut commits = git::skip_ignored(parse_commits(fields), ignored);
    let result = tally_fn(&mut commits);
    drop(commits); // Close the pipe so an abandoned child can exit

    let waited = sub.wait();
    match result {
        Ok(value) => {
            waited?;
            Ok(value)
        }
        // A git failure explains the stream error better than the parser can.
        Err(err) => match waited {
            Err(wait_err) => Err(wait_err),
            Ok(()) => Err(err).context("failed to tally commits"),
        },
    }
}
