//! git-ledger - authorship analytics for git repositories
//!
//! Tallies who edited what, when, and how much over any revision range and
//! path selection, and presents the result as a ranked table, an annotated
//! file tree, or a time histogram.

mod cancel;
mod cache;
mod cli;
mod engine;
mod error;
mod fingerprint;
mod git;
mod tally;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // -v forces debug logging for our own crate; RUST_LOG still wins when
    // set explicitly.
    let default_directives = if cli.verbose { "git_ledger=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives)))
        .init();

    cli::run(cli)
}
