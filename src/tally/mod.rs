//! Summations over commits.
//!
//! An intermediate [`Tally`] is the combinable unit the whole engine is
//! built around: workers accumulate them independently and the results are
//! merged with [`Tally::combine`], which is associative and commutative, so
//! the final numbers do not depend on how the revision list was partitioned
//! or in which order partial results arrive.

pub mod bucket;
pub mod path;
pub mod tree;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeZone, Utc};

use crate::git::Commit;

/// Which statistic ranks authors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TallyMode {
    #[default]
    Commits,
    Lines,
    Files,
    LastModified,
    FirstModified,
}

impl TallyMode {
    /// Whether this mode needs numstat diffs from git.
    pub fn needs_diffs(&self) -> bool {
        matches!(self, TallyMode::Lines | TallyMode::Files)
    }
}

/// Options shared by every tally operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TallyOpts {
    pub mode: TallyMode,
    /// Count merge commits. Merge diffs are not tallied (git emits none
    /// without `-m`), so merges move commit counts and edit times only.
    pub count_merges: bool,
    /// Group authors by email instead of by name.
    pub key_by_email: bool,
}

impl TallyOpts {
    /// The key a commit's author is grouped under.
    pub fn key<'c>(&self, commit: &'c Commit) -> &'c str {
        if self.key_by_email {
            &commit.author_email
        } else {
            &commit.author_name
        }
    }
}

/// Running accumulator of one author's contributions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    pub author_name: String,
    pub author_email: String,
    /// Short hashes seen. Deduplicates a commit observed under several
    /// paths, and across cache hits and workers.
    pub commit_set: HashSet<String>,
    pub added: u64,
    pub removed: u64,
    pub file_set: HashSet<String>,
    pub first_commit_time: Option<DateTime<Utc>>,
    pub last_commit_time: Option<DateTime<Utc>>,
    /// Plain counter for call sites where the input is known to be
    /// duplicate-free (e.g. one insertion per commit per bucket).
    pub num_tallied: u64,
}

impl Tally {
    pub fn new(author_name: &str, author_email: &str) -> Self {
        Tally {
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
            ..Default::default()
        }
    }

    /// Record that this author made `commit`: membership and edit times,
    /// but not lines or files (those depend on which diffs the caller
    /// wants counted).
    pub fn mark_commit(&mut self, commit: &Commit) {
        self.commit_set.insert(commit.short_hash.clone());
        self.observe_time(commit.date);
    }

    pub(crate) fn observe_time(&mut self, date: DateTime<Utc>) {
        self.last_commit_time = Some(match self.last_commit_time {
            Some(prev) => prev.max(date),
            None => date,
        });
        self.first_commit_time = Some(match self.first_commit_time {
            Some(prev) => prev.min(date),
            None => date,
        });
    }

    /// Merge two tallies. Associative and commutative; the empty tally is
    /// the identity.
    pub fn combine(mut self, other: Tally) -> Tally {
        if self.author_name.is_empty() {
            self.author_name = other.author_name;
        }
        if self.author_email.is_empty() {
            self.author_email = other.author_email;
        }

        self.commit_set.extend(other.commit_set);
        self.file_set.extend(other.file_set);
        self.added += other.added;
        self.removed += other.removed;
        self.num_tallied += other.num_tallied;

        self.last_commit_time = match (self.last_commit_time, other.last_commit_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.first_commit_time = match (self.first_commit_time, other.first_commit_time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        self
    }

    /// Materialize set cardinalities into plain counts.
    ///
    /// Panics if both name and email are empty; a tally with no identity
    /// means a bookkeeping bug upstream, not bad user input.
    pub fn finalize(self) -> FinalTally {
        if self.author_name.is_empty() && self.author_email.is_empty() {
            panic!("cannot finalize a tally with no author identity");
        }

        let commits = if self.commit_set.is_empty() {
            self.num_tallied
        } else {
            self.commit_set.len() as u64
        };

        FinalTally {
            author_name: self.author_name,
            author_email: self.author_email,
            commits,
            lines_added: self.added,
            lines_removed: self.removed,
            file_count: self.file_set.len() as u64,
            first_commit_time: self.first_commit_time.unwrap_or_else(epoch),
            last_commit_time: self.last_commit_time.unwrap_or_else(epoch),
        }
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).unwrap()
}

/// A finished tally, ready for ranking and display.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalTally {
    pub author_name: String,
    pub author_email: String,
    pub commits: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub file_count: u64,
    pub first_commit_time: DateTime<Utc>,
    pub last_commit_time: DateTime<Utc>,
}

impl FinalTally {
    pub fn sort_key(&self, mode: TallyMode) -> i64 {
        match mode {
            TallyMode::Commits => self.commits as i64,
            TallyMode::Files => self.file_count as i64,
            TallyMode::Lines => (self.lines_added + self.lines_removed) as i64,
            TallyMode::LastModified => self.last_commit_time.timestamp(),
            TallyMode::FirstModified => self.first_commit_time.timestamp(),
        }
    }

    /// Ordering under `mode`, ties broken by most recent edit.
    pub fn compare(&self, other: &FinalTally, mode: TallyMode) -> Ordering {
        self.sort_key(mode)
            .cmp(&other.sort_key(mode))
            .then_with(|| self.last_commit_time.cmp(&other.last_commit_time))
    }

    /// Magnitude of this tally for bar plots.
    pub fn value(&self, mode: TallyMode) -> u64 {
        match mode {
            TallyMode::Files => self.file_count,
            TallyMode::Lines => self.lines_added + self.lines_removed,
            _ => self.commits,
        }
    }
}

/// Finalize a keyed tally map and sort it best-first.
pub fn rank(tallies: HashMap<String, Tally>, mode: TallyMode) -> Vec<FinalTally> {
    let mut finalized: Vec<FinalTally> =
        tallies.into_values().map(Tally::finalize).collect();
    finalized.sort_by(|a, b| b.compare(a, mode));
    finalized
}
