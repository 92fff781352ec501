//! Pathspec matching for post-filtering commit diffs.
//!
//! Commits that come out of the cache carry every file they touched, so
//! their diffs have to be re-limited to the pathspecs of the current query.
//! Supports plain (include) patterns and the `:!`/`:(exclude)` magic;
//! anything else magic is rejected up front.

use anyhow::Result;
use globset::{Glob, GlobMatcher};

use crate::error::Error;
use crate::git::Commit;

/// A compiled set of include and exclude patterns.
#[derive(Debug, Default)]
pub struct Pathspecs {
    includes: Vec<Matcher>,
    excludes: Vec<Matcher>,
}

#[derive(Debug)]
struct Matcher {
    raw: String,
    glob: Option<GlobMatcher>,
}

impl Matcher {
    fn new(pattern: &str) -> Self {
        let raw = pattern.trim_end_matches('/').to_string();
        // A pattern that isn't a valid glob still matches literally.
        let glob = Glob::new(&raw).ok().map(|g| g.compile_matcher());
        Matcher { raw, glob }
    }

    fn matches(&self, path: &str) -> bool {
        if path == self.raw {
            return true;
        }

        // Directory prefix, the common case for pathspecs like "src".
        if path.len() > self.raw.len()
            && path.starts_with(&self.raw)
            && path.as_bytes()[self.raw.len()] == b'/'
        {
            return true;
        }

        self.glob.as_ref().is_some_and(|g| g.is_match(path))
    }
}

impl Pathspecs {
    /// Compile raw pathspec arguments, failing fast on unsupported magic.
    pub fn parse(specs: &[String]) -> Result<Pathspecs> {
        let mut parsed = Pathspecs::default();

        for spec in specs {
            if let Some(rest) = spec.strip_prefix(":(exclude)") {
                parsed.excludes.push(Matcher::new(rest));
            } else if let Some(rest) = spec.strip_prefix(":!") {
                parsed.excludes.push(Matcher::new(rest));
            } else if spec.starts_with(':') {
                return Err(Error::Usage(format!(
                    "unsupported magic in pathspec: \"{spec}\""
                ))
                .into());
            } else {
                parsed.includes.push(Matcher::new(spec));
            }
        }

        Ok(parsed)
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    /// Whether a diff at this path survives the filter.
    pub fn keep(&self, path: &str) -> bool {
        let included =
            self.includes.is_empty() || self.includes.iter().any(|m| m.matches(path));
        let excluded = self.excludes.iter().any(|m| m.matches(path));
        included && !excluded
    }

    /// Strip the commit's diffs down to those matching the filter.
    pub fn limit_diffs(&self, commit: &mut Commit) {
        if self.is_empty() {
            return;
        }
        commit.file_diffs.retain(|diff| self.keep(&diff.path));
    }
}

/// Stream adapter applying [`Pathspecs::limit_diffs`] to every commit.
pub fn limit_diffs_by_pathspec<I>(
    commits: I,
    pathspecs: Pathspecs,
) -> impl Iterator<Item = Result<Commit>>
where
    I: Iterator<Item = Result<Commit>>,
{
    commits.map(move |item| {
        item.map(|mut commit| {
            pathspecs.limit_diffs(&mut commit);
            commit
        })
    })
}
