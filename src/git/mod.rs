//! The commit model and access to repository data.
//!
//! Git is invoked directly as a subprocess and its output parsed, rather
//! than going through libgit2; the log formats involved are stable plumbing
//! and a child process per worker is what lets the engine parallelize.

pub mod config;
pub mod parse;
pub mod pathspec;
pub mod subprocess;

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use subprocess::LogFilters;

/// A single commit as parsed from the git log stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub short_hash: String,
    pub is_merge: bool,
    pub author_name: String,
    pub author_email: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,
    pub file_diffs: Vec<FileDiff>,
}

impl Commit {
    /// Best available identifier for log messages.
    pub fn name(&self) -> &str {
        if !self.short_hash.is_empty() {
            &self.short_hash
        } else if !self.hash.is_empty() {
            &self.hash
        } else {
            "unknown"
        }
    }
}

/// A file changed in a commit. Line counts are zero for binary files and
/// pure renames; the path is the post-rename path when the file was moved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub lines_added: u64,
    pub lines_removed: u64,
}

/// Full hashes for the given revision ranges, oldest first.
pub fn rev_list(
    revs: &[String],
    pathspecs: &[String],
    filters: &LogFilters,
) -> Result<Vec<String>> {
    let mut sub = subprocess::run_rev_list(revs, pathspecs, filters)?;

    let mut out = Vec::new();
    for line in sub.stdout_lines()? {
        out.push(line.context("error reading rev-list output")?);
    }

    sub.wait().context("error getting full rev list")?;
    Ok(out)
}

/// Absolute path of the repository root.
pub fn get_root() -> Result<PathBuf> {
    let mut sub = subprocess::run_rev_parse_toplevel()?;
    let text = sub.stdout_text()?;
    sub.wait().context("failed to get git root directory")?;
    Ok(PathBuf::from(text))
}

/// All paths currently in the working tree under the given pathspecs.
pub fn working_tree_files(pathspecs: &[String]) -> Result<HashSet<String>> {
    let mut sub = subprocess::run_ls_files(pathspecs)?;

    let mut set = HashSet::new();
    for field in sub.stdout_fields()? {
        let path = field.context("error reading ls-files output")?;
        if !path.is_empty() {
            set.insert(path);
        }
    }

    sub.wait().context("error getting working tree files")?;
    Ok(set)
}

/// Drops commits whose full hash appears in the ignore set.
pub fn skip_ignored<I>(
    commits: I,
    ignored: HashSet<String>,
) -> impl Iterator<Item = Result<Commit>>
where
    I: Iterator<Item = Result<Commit>>,
{
    commits.filter(move |item| match item {
        Ok(commit) => !ignored.contains(&commit.hash),
        Err(_) => true,
    })
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use chrono::TimeZone;

    /// Commit fixture with sensible defaults for tally tests.
    pub fn commit(
        short: &str,
        name: &str,
        email: &str,
        date_secs: i64,
        diffs: &[(&str, u64, u64)],
    ) -> Commit {
        Commit {
            hash: format!("{short:a<40}"),
            short_hash: short.to_string(),
            is_merge: false,
            author_name: name.to_string(),
            author_email: email.to_string(),
            date: Utc.timestamp_opt(date_secs, 0).unwrap(),
            file_diffs: diffs
                .iter()
                .map(|(path, added, removed)| FileDiff {
                    path: path.to_string(),
                    lines_added: *added,
                    lines_removed: *removed,
                })
                .collect(),
        }
    }

    pub fn ok_commits(commits: Vec<Commit>) -> impl Iterator<Item = Result<Commit>> {
        commits.into_iter().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn skip_ignored_drops_matching_hashes() {
        let a = commit("aaa", "bob", "bob@x", 100, &[]);
        let b = commit("bbb", "jim", "jim@x", 200, &[]);
        let ignored: HashSet<String> = [a.hash.clone()].into();

        let kept: Vec<_> = skip_ignored(ok_commits(vec![a, b.clone()]), ignored)
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(kept, vec![b]);
    }

    #[test]
    fn commit_name_prefers_short_hash() {
        let c = commit("abc1234", "bob", "bob@x", 100, &[]);
        assert_eq!(c.name(), "abc1234");

        let mut no_short = c.clone();
        no_short.short_hash.clear();
        assert_eq!(no_short.name(), no_short.hash.as_str());
    }
}
