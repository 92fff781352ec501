//! The hidden `dump` subcommand: prints the parsed commit stream, mostly
//! useful for debugging the parser against a real repository.

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use crate::cli::{repo_context, FilterArgs, RevArgs};
use crate::git::parse::parse_commits;
use crate::git::subprocess;

#[derive(Args, Debug, Default, Clone)]
pub struct DumpArgs {
    #[command(flatten)]
    pub filters: FilterArgs,

    /// Skip diffs (faster)
    #[arg(short = 's', long)]
    pub short: bool,

    #[command(flatten)]
    pub revs: RevArgs,
}

pub fn run(args: &DumpArgs) -> Result<()> {
    debug!(?args, "called dump");

    let (_root, files) = repo_context()?;

    let mut sub = subprocess::run_log(
        &args.revs.revs_or_head(),
        &args.revs.pathspecs,
        &args.filters.to_filters(),
        !args.short,
        files.has_mailmap(),
    )?;

    let fields = sub.stdout_fields()?;
    for commit in parse_commits(fields) {
        let commit = commit.context("error running \"dump\"")?;
        println!(
            "{} {} <{}> {} merge:{}",
            commit.name(),
            commit.author_name,
            commit.author_email,
            commit.date.to_rfc3339(),
            commit.is_merge,
        );
        for diff in &commit.file_diffs {
            println!("  {} +{} -{}", diff.path, diff.lines_added, diff.lines_removed);
        }
    }

    sub.wait()?;
    Ok(())
}
