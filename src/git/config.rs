//! Detection of the supplemental files that change how history is read:
//! mailmaps (author identity mapping) and the blame ignore-revs list.
//!
//! Only the conventional in-repo paths and the `mailmap.file` git config
//! setting are consulted, as the upstream tool does.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::Error;
use crate::git::parse::is_rev;
use crate::git::subprocess;

/// Paths of the supplemental files that exist for this repository.
#[derive(Debug, Clone, Default)]
pub struct SupplementalFiles {
    pub repo_mailmap: Option<PathBuf>,
    pub global_mailmap: Option<PathBuf>,
    pub ignore_revs: Option<PathBuf>,
}

impl SupplementalFiles {
    pub fn has_mailmap(&self) -> bool {
        self.repo_mailmap.is_some() || self.global_mailmap.is_some()
    }

    /// Full hashes from the ignore-revs file, if one exists. Lines that are
    /// not revision hashes (comments, blanks) are skipped.
    pub fn ignore_revs(&self) -> Result<Vec<String>> {
        let Some(path) = &self.ignore_revs else {
            return Ok(Vec::new());
        };

        let file = fs::File::open(path)
            .with_context(|| format!("could not open ignore-revs file {}", path.display()))?;

        let mut revs = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.context("error reading ignore-revs file")?;
            let line = line.trim();
            if is_rev(line) {
                revs.push(line.to_string());
            }
        }

        Ok(revs)
    }
}

/// Looks up the mailmap.file setting in the git config. Unset is not an
/// error.
fn global_mailmap_path() -> Result<Option<PathBuf>> {
    let mut sub = subprocess::run_config_get("mailmap.file")?;
    let text = sub.stdout_text()?;

    if let Err(err) = sub.wait() {
        // git config exits 1 when the key is simply absent.
        if err
            .downcast_ref::<Error>()
            .is_some_and(|e| matches!(e, Error::Subprocess { .. }))
        {
            debug!("no mailmap.file configured");
            return Ok(None);
        }
        return Err(err);
    }

    if text.is_empty() {
        return Ok(None);
    }

    Ok(Some(PathBuf::from(text)))
}

/// Checks which supplemental files exist on disk for the given repository.
pub fn detect_supplemental_files(git_root: &Path) -> Result<SupplementalFiles> {
    let mut files = SupplementalFiles::default();

    let repo_mailmap = git_root.join(".mailmap");
    if repo_mailmap.is_file() {
        files.repo_mailmap = Some(repo_mailmap);
    }

    if let Some(path) = global_mailmap_path()? {
        if path.is_file() {
            files.global_mailmap = Some(path);
        }
    }

    let ignore_revs = git_root.join(".git-blame-ignore-revs");
    if ignore_revs.is_file() {
        files.ignore_revs = Some(ignore_revs);
    }

    Ok(files)
}
