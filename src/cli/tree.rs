//! The `tree` subcommand: the working directory annotated per subtree with
//! its winning contributor.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use console::style;
use tracing::debug;

use crate::cli::{fmt, open_cache, repo_context, FilterArgs, ModeArgs, RevArgs};
use crate::engine::{self, QueryOpts};
use crate::tally::tree::TreeNode;
use crate::tally::{FinalTally, TallyMode, TallyOpts};

const DEFAULT_MAX_DEPTH: usize = 100;

#[derive(Args, Debug, Default, Clone)]
pub struct TreeArgs {
    #[command(flatten)]
    pub mode: ModeArgs,

    #[command(flatten)]
    pub filters: FilterArgs,

    /// Show each author's email and group by email
    #[arg(short = 'e', long)]
    pub email: bool,

    /// Count merge commits
    #[arg(long)]
    pub merges: bool,

    /// Maximum tree depth to print
    #[arg(short = 'd', long, value_name = "DEPTH")]
    pub depth: Option<usize>,

    /// Also show files no longer in the working tree
    #[arg(short = 'a', long)]
    pub all: bool,

    #[command(flatten)]
    pub revs: RevArgs,
}

pub fn run(args: &TreeArgs) -> Result<()> {
    debug!(?args, "called tree");

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
        show_progress: true,
    };

    let tree =
        engine::tally_commits_tree(&query, &files, cache).context("error running \"tree\"")?;

    if tree.children.is_empty() {
        debug!("tree was empty");
        return Ok(());
    }

    let opts = PrintOpts {
        mode,
        max_depth: args.depth.unwrap_or(DEFAULT_MAX_DEPTH),
        show_hidden: args.all,
        show_email: args.email,
    };

    let mut lines = Vec::new();
    to_lines(&tree, ".", 0, "", &[], &opts, &mut lines);
    print_tree(&lines, &opts);
    Ok(())
}

struct PrintOpts {
    mode: TallyMode,
    max_depth: usize,
    show_hidden: bool,
    show_email: bool,
}

struct OutputLine {
    indent: String,
    path: String,
    tally: Option<FinalTally>,
    show_line: bool,
    show_tally: bool,
    dim_tally: bool,
    dim_path: bool,
}

fn author_key(t: &FinalTally, opts: &PrintOpts) -> String {
    if opts.show_email {
        t.author_email.clone()
    } else {
        t.author_name.clone()
    }
}

/// Recursively turn tree nodes into output lines.
fn to_lines(
    node: &TreeNode,
    path: &str,
    depth: usize,
    last_author: &str,
    is_final_child: &[bool],
    opts: &PrintOpts,
    lines: &mut Vec<OutputLine>,
) {
    if depth > opts.max_depth {
        return;
    }

    // Path ellision: fold single-child chains into one line.
    if depth < opts.max_depth && node.children.len() == 1 {
        let (name, child) = node.children.iter().next().expect("one child");
        let joined = if path == "." {
            name.clone()
        } else {
            format!("{path}/{name}")
        };
        to_lines(child, &joined, depth + 1, last_author, is_final_child, opts, lines);
        return;
    }

    let mut indent = String::new();
    for (i, is_final) in is_final_child.iter().enumerate() {
        if i < is_final_child.len() - 1 {
            indent.push_str(if *is_final { "    " } else { "│   " });
        } else {
            indent.push_str(if *is_final { "└── " } else { "├── " });
        }
    }

    let display_path = if node.children.is_empty() {
        path.to_string()
    } else {
        format!("{path}/")
    };

    let node_author = node
        .final_tally
        .as_ref()
        .map(|t| author_key(t, opts))
        .unwrap_or_default();

    lines.push(OutputLine {
        indent,
        path: display_path,
        tally: node.final_tally.clone(),
        show_line: node.in_worktree || opts.show_hidden,
        show_tally: opts.show_hidden || node_author != last_author || !node.children.is_empty(),
        dim_tally: !node.children.is_empty(),
        dim_path: !node.in_worktree,
    });

    // Directories first, then alphabetical.
    let mut child_names: Vec<&String> = node.children.keys().collect();
    child_names.sort_by(|a, b| {
        let a_dir = !node.children[*a].children.is_empty();
        let b_dir = !node.children[*b].children.is_empty();
        b_dir.cmp(&a_dir).then_with(|| a.cmp(b))
    });

    let mut final_index = 0;
    for (i, name) in child_names.iter().enumerate() {
        let child = &node.children[*name];
        if child.in_worktree || opts.show_hidden {
            final_index = i;
        }
    }

    for (i, name) in child_names.iter().enumerate() {
        let child = &node.children[*name];
        let mut finals = is_final_child.to_vec();
        finals.push(i == final_index);
        to_lines(child, name, depth + 1, &node_author, &finals, opts, lines);
    }
}

fn metric(t: &FinalTally, mode: TallyMode) -> String {
    match mode {
        TallyMode::Commits => format!("({})", fmt::number(t.commits)),
        TallyMode::Files => format!("({})", fmt::number(t.file_count)),
        TallyMode::Lines => format!(
            "({} / {})",
            style(fmt::number(t.lines_added)).green(),
            style(fmt::number(t.lines_removed)).red(),
        ),
        TallyMode::LastModified => {
            format!("({})", fmt::relative_time(Utc::now(), t.last_commit_time))
        }
        TallyMode::FirstModified => {
            format!("({})", fmt::relative_time(Utc::now(), t.first_commit_time))
        }
    }
}

fn print_tree(lines: &[OutputLine], opts: &PrintOpts) {
    let longest = lines
        .iter()
        .filter(|l| l.show_line)
        .map(|l| console::measure_text_width(&l.indent) + l.path.chars().count())
        .max()
        .unwrap_or(0);
    let tally_start = longest + 4;

    for line in lines {
        if !line.show_line {
            continue;
        }

        let path = if line.dim_path {
            style(line.path.as_str()).dim().to_string()
        } else {
            line.path.clone()
        };

        let Some(tally) = line.tally.as_ref().filter(|_| line.show_tally) else {
            println!("{}{}", line.indent, path);
            continue;
        };

        let author = if opts.show_email {
            fmt::abbrev(&fmt::email(&tally.author_email), 25)
        } else {
            fmt::abbrev(&tally.author_name, 25)
        };

        let used = console::measure_text_width(&line.indent) + line.path.chars().count();
        let dots = ".".repeat(tally_start.saturating_sub(used));
        let metric = metric(tally, opts.mode);

        if line.dim_tally {
            println!(
                "{}{}{} {} {}",
                line.indent,
                path,
                style(dots).dim(),
                style(author).dim(),
                metric,
            );
        } else {
            println!("{}{}{}{} {}", line.indent, path, style(dots).dim(), author, metric);
        }
    }
}
