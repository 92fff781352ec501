//! The `hist` subcommand: a time histogram with the winning contributor
//! per bucket.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use console::style;
use tracing::debug;

use crate::cli::{fmt, open_cache, repo_context, FilterArgs, RevArgs};
use crate::engine::{self, QueryOpts};
use crate::error::Error;
use crate::tally::bucket::TimeBucket;
use crate::tally::{FinalTally, TallyMode, TallyOpts};

const BAR_WIDTH: u64 = 36;

#[derive(Args, Debug, Default, Clone)]
pub struct HistArgs {
    /// Plot lines added + removed
    #[arg(short = 'l', long)]
    pub lines: bool,

    /// Plot files changed
    #[arg(short = 'f', long)]
    pub files: bool,

    #[command(flatten)]
    pub filters: FilterArgs,

    /// Show each author's email and group by email
    #[arg(short = 'e', long)]
    pub email: bool,

    /// Count merge commits
    #[arg(long)]
    pub merges: bool,

    #[command(flatten)]
    pub revs: RevArgs,
}

impl HistArgs {
    fn mode(&self) -> Result<TallyMode> {
        match (self.lines, self.files) {
            (true, true) => {
                Err(Error::Usage("--lines and --files are mutually exclusive".to_string()).into())
            }
            (true, false) => Ok(TallyMode::Lines),
            (false, true) => Ok(TallyMode::Files),
            (false, false) => Ok(TallyMode::Commits),
        }
    }
}

pub fn run(args: &HistArgs) -> Result<()> {
    debug!(?args, "called hist");

    let mode = args.mode()?;
    let (root, files) = repo_context()?;
    let cache = open_cache(&root, &files);

    let revs = args.revs.revs_or_head();

    // The timeline runs to the present when we're plotting up to the tip;
    // otherwise it ends at the last commit.
    let end = if revs == ["HEAD".to_string()] && args.filters.until.is_none() {
        Some(Utc::now())
    } else {
        None
    };

    let query = QueryOpts {
        revs,
        pathspecs: args.revs.pathspecs.clone(),
        filters: args.filters.to_filters(),
        tally: TallyOpts {
            mode,
            count_merges: args.merges,
            key_by_email: args.email,
        },
        show_progress: true,
    };

    let buckets = engine::tally_commits_timeline(&query, &files, cache, end)
        .context("error running \"hist\"")?;

    draw_plot(&buckets, mode, args.email);
    Ok(())
}

fn draw_plot(buckets: &[TimeBucket], mode: TallyMode, show_email: bool) {
    let max_val = buckets
        .iter()
        .map(|b| b.total(mode))
        .max()
        .unwrap_or(0)
        .max(BAR_WIDTH);

    let mut last_author = String::new();
    for bucket in buckets {
        let value = bucket.value(mode);
        if value == 0 {
            println!("{} ┤ ", bucket.label);
            continue;
        }

        let total = bucket.total(mode);
        let solid = (value * BAR_WIDTH).div_ceil(max_val);
        let faded = (total * BAR_WIDTH).div_ceil(max_val).saturating_sub(solid);

        let winner = bucket.final_tally.as_ref();
        let tally_part = winner.map_or(String::new(), |t| {
            let part = hist_tally(t, mode, show_email);
            if t.author_name == last_author {
                style(part).dim().to_string()
            } else {
                part
            }
        });

        println!(
            "{} ┤ {}{}  {}",
            bucket.label,
            "#".repeat(solid as usize),
            style("-".repeat(faded as usize)).dim(),
            tally_part,
        );

        if let Some(t) = winner {
            last_author = t.author_name.clone();
        }
    }
}

fn hist_tally(t: &FinalTally, mode: TallyMode, show_email: bool) -> String {
    let metric = match mode {
        TallyMode::Files => format!("({})", fmt::number(t.file_count)),
        TallyMode::Lines => format!(
            "({} / {})",
            fmt::number(t.lines_added),
            fmt::number(t.lines_removed)
        ),
        _ => format!("({})", fmt::number(t.commits)),
    };

    let author = if show_email {
        fmt::abbrev(&fmt::email(&t.author_email), 25)
    } else {
        fmt::abbrev(&t.author_name, 25)
    };

    format!("{author} {metric}")
}
