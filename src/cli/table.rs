//! The `table` subcommand: a ranked author table, optionally as CSV.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use console::style;
use tracing::debug;

use crate::cli::{check_limit, fmt, open_cache, repo_context, FilterArgs, ModeArgs, RevArgs};
use crate::engine::{self, QueryOpts};
use crate::tally::{FinalTally, TallyMode, TallyOpts};

const NARROW_AUTHOR: usize = 25;
const WIDE_AUTHOR: usize = 29;

#[derive(Args, Debug, Default, Clone)]
pub struct TableArgs {
    #[command(flatten)]
    pub mode: ModeArgs,

    #[command(flatten)]
    pub filters: FilterArgs,

    /// Show each author's email and group by email
    #[arg(short = 'e', long)]
    pub email: bool,

    /// Output as CSV
    #[arg(long)]
    pub csv: bool,

    /// Count merge commits
    #[arg(long)]
    pub merges: bool,

    /// Only show the top N authors
    #[arg(short = 'n', long, value_name = "N")]
    pub limit: Option<usize>,

    #[command(flatten)]
    pub revs: RevArgs,
}

pub fn run(args: &TableArgs) -> Result<()> {
    debug!(?args, "called table");
    check_limit(args.limit)?;

    let mode = args.mode.mode();
    let (root, files) = repo_context()?;
    let cache = open_cache(&root, &files);

    let query = QueryOpts {
        revs: args.revs.revs_or_head(),
        pathspecs: args.revs.pathspecs.clone(),
        filters: args.filters.to_filters(),
        tally: TallyOpts {
            mode,
            count_merges: args.merges,
            key_by_email: args.email,
        },
        show_progress: !args.csv,
    };

    let mut ranked =
        engine::tally_commits(&query, &files, cache).context("error running \"table\"")?;

    let mut filtered_out = 0;
    if let Some(limit) = args.limit {
        if limit < ranked.len() {
            filtered_out = ranked.len() - limit;
            ranked.truncate(limit);
        }
    }

    if args.csv {
        write_csv(&ranked, mode, args.email);
    } else {
        write_table(&ranked, mode, args.email, filtered_out);
    }

    Ok(())
}

fn is_diff_mode(mode: TallyMode) -> bool {
    matches!(mode, TallyMode::Lines | TallyMode::Files)
}

fn write_csv(tallies: &[FinalTally], mode: TallyMode, show_email: bool) {
    let mut header = vec!["name"];
    if show_email {
        header.push("email");
    }
    header.push("commits");
    if is_diff_mode(mode) {
        header.extend(["lines added", "lines removed", "files"]);
    }
    header.extend(["last commit time", "first commit time"]);
    println!("{}", header.join(","));

    for t in tallies {
        let mut record = vec![fmt::csv_field(&t.author_name)];
        if show_email {
            record.push(fmt::csv_field(&t.author_email));
        }
        record.push(t.commits.to_string());
        if is_diff_mode(mode) {
            record.push(t.lines_added.to_string());
            record.push(t.lines_removed.to_string());
            record.push(t.file_count.to_string());
        }
        record.push(t.last_commit_time.to_rfc3339());
        record.push(t.first_commit_time.to_rfc3339());
        println!("{}", record.join(","));
    }
}

fn author_column(t: &FinalTally, show_email: bool, width: usize) -> String {
    let author = if show_email {
        format!("{} {}", t.author_name, fmt::email(&t.author_email))
    } else {
        t.author_name.clone()
    };
    format!("{:<width$}", fmt::abbrev(&author, width))
}

fn write_table(tallies: &[FinalTally], mode: TallyMode, show_email: bool, filtered_out: usize) {
    if tallies.is_empty() {
        return;
    }

    let now = Utc::now();
    let wide = is_diff_mode(mode);
    let author_width = if wide || show_email {
        WIDE_AUTHOR + if show_email { 20 } else { 0 }
    } else {
        NARROW_AUTHOR + if show_email { 20 } else { 0 }
    };

    let edit_header = if mode == TallyMode::FirstModified {
        "First Edit"
    } else {
        "Last Edit"
    };

    if wide {
        let total = author_width + 1 + 11 + 1 + 7 + 1 + 7 + 2 + 17;
        let rule = "─".repeat(total);
        println!("┌{rule}┐");
        println!(
            "│{:<author_width$} {:<11} {:>7} {:>7}  {:>17}│",
            "Author", edit_header, "Commits", "Files", "Lines (+/-)"
        );
        println!("├{rule}┤");

        for t in tallies {
            let lines = format!(
                "{} / {}",
                style(fmt::number(t.lines_added)).green(),
                style(fmt::number(t.lines_removed)).red(),
            );
            // The styled segments carry ANSI codes, so pad their plain
            // widths by hand.
            let plain =
                fmt::number(t.lines_added).len() + fmt::number(t.lines_removed).len() + 3;
            let pad = 17_usize.saturating_sub(plain);

            println!(
                "│{} {:<11} {:>7} {:>7}  {}{}│",
                author_column(t, show_email, author_width),
                fmt::relative_time(now, t.last_commit_time),
                fmt::number(t.commits),
                fmt::number(t.file_count),
                " ".repeat(pad),
                lines,
            );
        }

        if filtered_out > 0 {
            println!("│{:<total$}│", format!("...{} more...", fmt::number(filtered_out as u64)));
        }
        println!("└{rule}┘");
    } else {
        let total = author_width + 1 + 11 + 1 + 7;
        let rule = "─".repeat(total);
        println!("┌{rule}┐");
        println!(
            "│{:<author_width$} {:<11} {:>7}│",
            "Author", edit_header, "Commits"
        );
        println!("├{rule}┤");

        for t in tallies {
            let edit_time = if mode == TallyMode::FirstModified {
                t.first_commit_time
            } else {
                t.last_commit_time
            };
            println!(
                "│{} {:<11} {:>7}│",
                author_column(t, show_email, author_width),
                fmt::relative_time(now, edit_time),
                fmt::number(t.commits),
            );
        }

        if filtered_out > 0 {
            println!("│{:<total$}│", format!("...{} more...", fmt::number(filtered_out as u64)));
        }
        println!("└{rule}┘");
    }
}
