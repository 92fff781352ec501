//! Where cache files live on disk.
//!
//! Layout: `<cache root>/git-ledger/<repo base>-<fnv32 of abs repo path>/`,
//! so caches for different checkouts never collide. The cache root honors
//! the platform convention (`XDG_CACHE_HOME` on Linux), falling back to
//! `~/.cache`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::fingerprint::fnv32_hex;

const TOOL_DIR: &str = "git-ledger";

/// The per-user cache root for this tool.
pub fn cache_root() -> Result<PathBuf> {
    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .context("failed to determine cache storage path")?;
    Ok(base.join(TOOL_DIR))
}

/// The cache directory for one repository.
pub fn repo_cache_dir(git_root: &Path) -> Result<PathBuf> {
    let abs = git_root
        .canonicalize()
        .unwrap_or_else(|_| git_root.to_path_buf());

    let base = abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string());

    let hash = fnv32_hex(abs.to_string_lossy().as_bytes());
    Ok(cache_root()?.join(format!("{base}-{hash}")))
}
