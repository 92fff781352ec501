//! Per-path tallies and their reduction to per-author totals.
//!
//! Grouping by (author, path) is what makes the concurrent engine work:
//! each worker builds a [`TalliesByPath`] over its slice of history, the
//! partials merge associatively, and only the final reduction decides how
//! paths collapse into file counts (deduplicated, restricted to the
//! working tree).

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};

use crate::git::Commit;
use crate::tally::{Tally, TallyOpts};

/// Pseudo-path for commits that carry no diffs (merges counted via
/// `--merges`, empty commits). Keeps their commit counts and edit times in
/// the totals without inventing a file.
pub const NO_DIFF_PATHNAME: &str = "<no-diff>";

/// Tallies grouped author → path → tally.
#[derive(Debug, Clone, Default)]
pub struct TalliesByPath {
    map: HashMap<String, HashMap<String, Tally>>,
}

impl TalliesByPath {
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Record one commit's diffs.
    pub fn tally_commit(&mut self, commit: &Commit, opts: &TallyOpts) {
        if commit.is_merge && !opts.count_merges {
            return;
        }

        let key = opts.key(commit).to_string();
        let by_path = self.map.entry(key).or_default();

        if commit.file_diffs.is_empty() {
            Self::upsert(by_path, NO_DIFF_PATHNAME, commit, None);
            return;
        }

        for diff in &commit.file_diffs {
            Self::upsert(
                by_path,
                &diff.path,
                commit,
                Some((diff.lines_added, diff.lines_removed)),
            );
        }
    }

    fn upsert(
        by_path: &mut HashMap<String, Tally>,
        path: &str,
        commit: &Commit,
        lines: Option<(u64, u64)>,
    ) {
        let tally = by_path.entry(path.to_string()).or_insert_with(|| {
            let mut t = Tally::new(&commit.author_name, &commit.author_email);
            t.num_tallied = 1;
            if path != NO_DIFF_PATHNAME {
                t.file_set.insert(path.to_string());
            }
            t
        });

        tally.mark_commit(commit);
        if let Some((added, removed)) = lines {
            tally.added += added;
            tally.removed += removed;
        }
    }

    /// Merge another partial in. Associative and commutative.
    pub fn combine(mut self, other: TalliesByPath) -> TalliesByPath {
        for (key, paths) in other.map {
            let by_path = self.map.entry(key).or_default();
            for (path, tally) in paths {
                match by_path.remove(&path) {
                    Some(existing) => {
                        by_path.insert(path, existing.combine(tally));
                    }
                    None => {
                        by_path.insert(path, tally);
                    }
                }
            }
        }
        self
    }

    /// Collapse each author's paths into a single total. When a working
    /// tree set is given, only paths still present count as files; lines
    /// and commits count regardless.
    pub fn reduce(self, worktree: Option<&HashSet<String>>) -> HashMap<String, Tally> {
        let mut out = HashMap::new();

        for (key, paths) in self.map {
            let mut acc = Tally::default();
            for (_, mut tally) in paths {
                if let Some(wt) = worktree {
                    tally.file_set.retain(|p| wt.contains(p));
                }
                acc = acc.combine(tally);
            }
            out.insert(key, acc);
        }

        out
    }

    /// Iterate (author key, path, tally), consuming self.
    pub fn into_entries(self) -> impl Iterator<Item = (String, String, Tally)> {
        self.map.into_iter().flat_map(|(key, paths)| {
            paths
                .into_iter()
                .map(move |(path, tally)| (key.clone(), path, tally))
        })
    }
}

/// Drain a commit stream into per-path tallies.
pub fn tally_by_path<I>(commits: I, opts: &TallyOpts) -> Result<TalliesByPath>
where
    I: Iterator<Item = Result<Commit>>,
{
    let mut tallies = TalliesByPath::default();
    for commit in commits {
        let commit = commit.context("error iterating commits")?;
        tallies.tally_commit(&commit, opts);
    }
    Ok(tallies)
}

/// Single-pass flat tally for the sequential path: one tally per author,
/// duplicate-free by construction.
pub fn tally_commits<I>(
    commits: I,
    worktree: Option<&HashSet<String>>,
    opts: &TallyOpts,
) -> Result<HashMap<String, Tally>>
where
    I: Iterator<Item = Result<Commit>>,
{
    let mut tallies: HashMap<String, Tally> = HashMap::new();

    for commit in commits {
        let commit = commit.context("error iterating commits")?;
        if commit.is_merge && !opts.count_merges {
            continue;
        }

        let tally = tallies
            .entry(opts.key(&commit).to_string())
            .or_insert_with(|| Tally::new(&commit.author_name, &commit.author_email));

        tally.num_tallied += 1;
        tally.observe_time(commit.date);

        for diff in &commit.file_diffs {
            tally.added += diff.lines_added;
            tally.removed += diff.lines_removed;
            if worktree.map_or(true, |wt| wt.contains(&diff.path)) {
                tally.file_set.insert(diff.path.clone());
            }
        }
    }

    Ok(tallies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testutil::{commit, ok_commits};
    use crate::git::Commit;
    use crate::tally::{rank, TallyMode};

    fn lines_opts() -> TallyOpts {
        TallyOpts {
            mode: TallyMode::Lines,
            ..Default::default()
        }
    }

    fn fixture() -> Vec<Commit> {
        vec![
            commit(
                "baa",
                "bob",
                "bob@mail.com",
                100,
                &[("bim.txt", 4, 0), ("vim.txt", 8, 2), ("nim.txt", 2, 1)],
            ),
            commit("bab", "jim", "jim@mail.com", 200, &[("bim.txt", 3, 1)]),
        ]
    }

    #[test]
    fn flat_tally_respects_working_tree() {
        let worktree: HashSet<String> =
            ["bim.txt".to_string(), "vim.txt".to_string()].into();

        let tallies =
            tally_commits(ok_commits(fixture()), Some(&worktree), &lines_opts()).unwrap();
        let ranked = rank(tallies, TallyMode::Lines);

        let bob = &ranked[0];
        assert_eq!(bob.author_name, "bob");
        assert_eq!(bob.commits, 1);
        assert_eq!(bob.lines_added, 12);
        assert_eq!(bob.lines_removed, 2);
        assert_eq!(bob.file_count, 2); // nim.txt is not in the working tree

        let jim = &ranked[1];
        assert_eq!(jim.author_name, "jim");
        assert_eq!(jim.commits, 1);
        assert_eq!(jim.lines_added, 3);
        assert_eq!(jim.lines_removed, 1);
        assert_eq!(jim.file_count, 1);
    }

    #[test]
    fn by_path_reduction_matches_flat_tally() {
        let worktree: HashSet<String> =
            ["bim.txt".to_string(), "vim.txt".to_string()].into();

        let by_path = tally_by_path(ok_commits(fixture()), &lines_opts()).unwrap();
        let reduced = by_path.reduce(Some(&worktree));
        let ranked = rank(reduced, TallyMode::Lines);

        assert_eq!(ranked[0].author_name, "bob");
        assert_eq!(ranked[0].commits, 1);
        assert_eq!(ranked[0].lines_added, 12);
        assert_eq!(ranked[0].file_count, 2);
    }

    #[test]
    fn lines_follow_renamed_file() {
        // The parser emits the post-rename path, so the middle commit's
        // diff already points at bar.txt.
        let commits = vec![
            commit("baa", "bob", "bob@mail.com", 100, &[("bim.txt", 1, 1)]),
            commit("bab", "jim", "jim@mail.com", 200, &[("bar.txt", 3, 1)]),
            commit("bac", "bob", "bob@mail.com", 300, &[("bar.txt", 4, 1)]),
        ];
        let worktree: HashSet<String> = ["bar.txt".to_string()].into();

        let by_path = tally_by_path(ok_commits(commits), &lines_opts()).unwrap();
        let ranked = rank(by_path.reduce(Some(&worktree)), TallyMode::Lines);

        let bob = ranked.iter().find(|t| t.author_name == "bob").unwrap();
        assert_eq!(bob.file_count, 1);
        let jim = ranked.iter().find(|t| t.author_name == "jim").unwrap();
        assert_eq!(jim.file_count, 1);
        assert_eq!(jim.lines_added, 3);
    }

    #[test]
    fn merges_skipped_unless_opted_in() {
        let mut merge = commit("mmm", "bob", "bob@mail.com", 400, &[]);
        merge.is_merge = true;

        let skipped =
            tally_by_path(ok_commits(vec![merge.clone()]), &lines_opts()).unwrap();
        assert!(skipped.is_empty());

        let opts = TallyOpts {
            count_merges: true,
            ..lines_opts()
        };
        let counted = tally_by_path(ok_commits(vec![merge]), &opts).unwrap();
        let reduced = counted.reduce(None);
        let bob = &reduced["bob"];
        assert_eq!(bob.commit_set.len(), 1);
        assert!(bob.file_set.is_empty());
    }

    #[test]
    fn partition_invariance_over_chunked_input() {
        let commits = fixture();

        let whole = tally_by_path(ok_commits(commits.clone()), &lines_opts()).unwrap();

        let mut chunked = TalliesByPath::default();
        for chunk in commits.chunks(1) {
            let partial =
                tally_by_path(ok_commits(chunk.to_vec()), &lines_opts()).unwrap();
            chunked = chunked.combine(partial);
        }

        let a = rank(whole.reduce(None), TallyMode::Lines);
        let b = rank(chunked.reduce(None), TallyMode::Lines);
        assert_eq!(a, b);
    }
}
