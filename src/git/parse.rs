//! Streaming parser for the `git log -z` record format.
//!
//! Each commit arrives as NUL-delimited fields: hash, short hash, parent
//! hashes, author name, author email, unix date, then zero or more numstat
//! entries, then an empty field closing the record. A numstat entry is
//! either `added\tremoved\tpath` or, when rename detection splits the
//! path off, `added\tremoved\t` followed by the pre- and post-rename paths
//! as bare fields (the last path wins, so a renamed file is attributed to
//! its current location). Git puts a newline between the fixed fields and
//! the numstat block, which we strip.
//!
//! Parsing stops at the first malformed record; the failing commit is
//! never emitted.

use std::sync::OnceLock;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use tracing::debug;

use crate::error::Error;
use crate::git::{Commit, FileDiff};

/// Turns a sequence of NUL-delimited fields into a sequence of commits.
pub fn parse_commits<I>(fields: I) -> CommitParser<I>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    CommitParser {
        fields,
        pending: Pending::default(),
        now: Utc::now(),
        failed: false,
    }
}

pub struct CommitParser<I> {
    fields: I,
    pending: Pending,
    now: DateTime<Utc>,
    failed: bool,
}

#[derive(Default)]
struct Pending {
    fields_read: usize,
    hash: String,
    short_hash: String,
    is_merge: bool,
    author_name: String,
    author_email: String,
    date: Option<DateTime<Utc>>,
    diffs: Vec<FileDiff>,
    rename: Option<FileDiff>,
}

impl Pending {
    fn name(&self) -> &str {
        if !self.short_hash.is_empty() {
            &self.short_hash
        } else if !self.hash.is_empty() {
            &self.hash
        } else {
            "unknown"
        }
    }

    fn flush_rename(&mut self) {
        if let Some(diff) = self.rename.take() {
            if !diff.path.is_empty() {
                self.diffs.push(diff);
            }
        }
    }

    fn take_commit(&mut self) -> Option<Commit> {
        self.flush_rename();
        let done = std::mem::take(self);
        let date = done.date?;
        Some(Commit {
            hash: done.hash,
            short_hash: done.short_hash,
            is_merge: done.is_merge,
            author_name: done.author_name,
            author_email: done.author_email,
            date,
            file_diffs: done.diffs,
        })
    }
}

impl<I> Iterator for CommitParser<I>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let field = match self.fields.next() {
                Some(Ok(field)) => field,
                Some(Err(err)) => {
                    self.failed = true;
                    return Some(Err(Error::Parse {
                        commit: self.pending.name().to_string(),
                        detail: format!("error reading log stream: {err}"),
                    }
                    .into()));
                }
                None => {
                    // End of stream: close out a commit in progress.
                    if self.pending.fields_read > 0 {
                        if let Some(commit) = self.pending.take_commit() {
                            if admit(&commit, self.now) {
                                return Some(Ok(commit));
                            }
                        }
                    }
                    return None;
                }
            };

            match self.pending.fields_read {
                0 => {
                    if field.is_empty() {
                        continue; // Tolerate coalesced record separators
                    }
                    self.pending.hash = field;
                }
                1 => self.pending.short_hash = field,
                2 => self.pending.is_merge = field.split_whitespace().count() > 1,
                3 => self.pending.author_name = field,
                4 => self.pending.author_email = field,
                5 => match field.parse::<i64>() {
                    Ok(secs) => match Utc.timestamp_opt(secs, 0).single() {
                        Some(date) => self.pending.date = Some(date),
                        None => return Some(self.fail(&field, "timestamp out of range")),
                    },
                    Err(err) => {
                        return Some(self.fail(&field, &format!("could not parse date: {err}")))
                    }
                },
                _ => {
                    // Git emits a newline between the fixed fields and the
                    // numstat block.
                    let entry = field.strip_prefix('\n').unwrap_or(&field);

                    if entry.is_empty() {
                        // Record separator: the commit is complete.
                        if let Some(commit) = self.pending.take_commit() {
                            if admit(&commit, self.now) {
                                return Some(Ok(commit));
                            }
                        }
                        continue;
                    }

                    if let Err(err) = self.numstat_entry(entry) {
                        self.failed = true;
                        return Some(Err(err));
                    }
                }
            }

            self.pending.fields_read += 1;
        }
    }
}

impl<I> CommitParser<I>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    fn fail(&mut self, segment: &str, detail: &str) -> Result<Commit> {
        self.failed = true;
        Err(Error::Parse {
            commit: self.pending.name().to_string(),
            detail: format!("{detail} (in \"{}\")", segment.escape_debug()),
        }
        .into())
    }

    fn numstat_entry(&mut self, entry: &str) -> Result<()> {
        let parts: Vec<&str> = entry.trim_matches('\t').split('\t').collect();

        match parts.len() {
            1 => {
                // Bare path following a rename's counts. Git emits the
                // pre-rename path first, then the post-rename path; keeping
                // the last one attributes history to the current location.
                self.pending
                    .rename
                    .get_or_insert_with(FileDiff::default)
                    .path = parts[0].to_string();
            }
            2 => {
                let added = self.lines_changed(parts[0], entry)?;
                let removed = self.lines_changed(parts[1], entry)?;
                let diff = self.pending.rename.get_or_insert_with(FileDiff::default);
                diff.lines_added = added;
                diff.lines_removed = removed;
            }
            3 => {
                self.pending.flush_rename();
                let diff = FileDiff {
                    lines_added: self.lines_changed(parts[0], entry)?,
                    lines_removed: self.lines_changed(parts[1], entry)?,
                    path: parts[2].to_string(),
                };
                self.pending.diffs.push(diff);
            }
            _ => {
                return Err(Error::Parse {
                    commit: self.pending.name().to_string(),
                    detail: format!("could not parse file diff: \"{}\"", entry.escape_debug()),
                }
                .into());
            }
        }

        Ok(())
    }

    fn lines_changed(&self, token: &str, entry: &str) -> Result<u64> {
        if token == "-" {
            return Ok(0); // Binary file; count unknown
        }

        token.parse::<u64>().map_err(|err| {
            Error::Parse {
                commit: self.pending.name().to_string(),
                detail: format!(
                    "could not parse \"{token}\" as line count from \"{}\": {err}",
                    entry.escape_debug()
                ),
            }
            .into()
        })
    }
}

/// Whether a fully parsed commit should be emitted at all.
fn admit(commit: &Commit, now: DateTime<Utc>) -> bool {
    if commit.author_name.is_empty() && commit.author_email.is_empty() {
        debug!(commit = commit.name(), "skipping commit with no author");
        return false;
    }

    if commit.date > now {
        debug!(
            commit = commit.name(),
            "skipping commit with date in the future"
        );
        return false;
    }

    true
}

/// Returns true for a full-length revision hash, optionally negated with a
/// leading "^".
pub fn is_rev(s: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[\^a-f0-9]+$").expect("valid regex"));
    re.is_match(s) && (s.len() == 40 || s.len() == 41)
}
