//! Cache for commits we've already diffed and parsed.
//!
//! Reading history with `--numstat` is the expensive part of every query,
//! so parsed commits are persisted between runs. The engine sees one
//! [`Cache`] front over swappable backends: the real on-disk backend and a
//! noop used when caching is disabled or couldn't be initialized (which is
//! a warning, never an error).

pub mod backend;
pub mod paths;

use std::time::Instant;

use anyhow::Result;
use tracing::debug;

use crate::git::Commit;

/// Environment variable that disables caching when set to anything
/// non-empty.
pub const DISABLE_CACHE_ENV: &str = "GIT_LEDGER_DISABLE_CACHE";

pub fn caching_enabled() -> bool {
    std::env::var_os(DISABLE_CACHE_ENV).map_or(true, |v| v.is_empty())
}

/// Lazily yielded cache hits.
pub type CommitHits = Box<dyn Iterator<Item = Result<Commit>> + Send>;

/// Storage interface the cache front delegates to.
pub trait Backend: Send {
    fn name(&self) -> &'static str;
    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    /// Stream the stored commits whose full hash is in `revs`. Missing or
    /// empty storage yields an empty stream, not an error.
    fn get(&mut self, revs: &[String]) -> Result<CommitHits>;
    fn add(&mut self, commits: &[Commit]) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

pub struct Cache {
    backend: Box<dyn Backend>,
}

impl Cache {
    pub fn new(backend: Box<dyn Backend>) -> Cache {
        Cache { backend }
    }

    pub fn noop() -> Cache {
        Cache::new(Box::new(backend::noop::NoopBackend))
    }

    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn open(&mut self) -> Result<()> {
        let start = Instant::now();
        self.backend.open()?;
        debug!(duration_ms = start.elapsed().as_millis(), "cache open");
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        let start = Instant::now();
        self.backend.close()?;
        debug!(duration_ms = start.elapsed().as_millis(), "cache close");
        Ok(())
    }

    pub fn get(&mut self, revs: &[String]) -> Result<CommitHits> {
        let start = Instant::now();
        let hits = self.backend.get(revs)?;
        debug!(
            requested = revs.len(),
            duration_ms = start.elapsed().as_millis(),
            "cache get"
        );
        Ok(hits)
    }

    pub fn add(&mut self, commits: &[Commit]) -> Result<()> {
        let start = Instant::now();
        self.backend.add(commits)?;
        debug!(
            count = commits.len(),
            duration_ms = start.elapsed().as_millis(),
            "cache add"
        );
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.backend.clear()?;
        debug!("cache clear");
        Ok(())
    }
}
