//! The do-nothing backend: reads are always empty, writes always succeed.
//! Used when caching is disabled or real storage failed to initialize.

use anyhow::Result;

use crate::cache::{Backend, CommitHits};
use crate::git::Commit;

pub struct NoopBackend;

impl Backend for NoopBackend {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn get(&mut self, _revs: &[String]) -> Result<CommitHits> {
        Ok(Box::new(std::iter::empty()))
    }

    fn add(&mut self, _commits: &[Commit]) -> Result<()> {
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_reads_nothing_and_accepts_writes() {
        let mut backend = NoopBackend;
        backend.open().unwrap();
        backend.add(&[]).unwrap();
        let hits: Vec<_> = backend.get(&["abc".to_string()]).unwrap().collect();
        assert!(hits.is_empty());
        backend.close().unwrap();
    }
}
