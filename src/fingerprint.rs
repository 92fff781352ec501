//! Repository-state fingerprinting for cache invalidation.
//!
//! The cache file is named after a 32-bit FNV-1 hash of the mailmap inputs
//! (repo-local first, then the configured global one). Editing either file
//! changes resolved author identities, which changes the fingerprint, which
//! makes the engine stop selecting the stale cache file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::git::config::SupplementalFiles;

const FNV_OFFSET_32: u32 = 2_166_136_261;
const FNV_PRIME_32: u32 = 16_777_619;

/// 32-bit FNV-1.
pub struct Fnv32(u32);

impl Fnv32 {
    pub fn new() -> Self {
        Fnv32(FNV_OFFSET_32)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = self.0.wrapping_mul(FNV_PRIME_32) ^ u32::from(b);
        }
    }

    pub fn finish(&self) -> u32 {
        self.0
    }
}

impl Default for Fnv32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash of arbitrary bytes, rendered as 8 hex digits.
pub fn fnv32_hex(bytes: &[u8]) -> String {
    let mut h = Fnv32::new();
    h.write(bytes);
    format!("{:08x}", h.finish())
}

fn hash_file_if_present(h: &mut Fnv32, path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };

    match fs::read(path) {
        Ok(bytes) => {
            h.write(&bytes);
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("could not read mailmap file {}", path.display()))
        }
    }
}

/// Fingerprint of the identity-mapping state for a repository. Missing
/// files contribute nothing.
pub fn repo_state_fingerprint(files: &SupplementalFiles) -> Result<String> {
    let mut h = Fnv32::new();
    hash_file_if_present(&mut h, files.repo_mailmap.as_deref())?;
    hash_file_if_present(&mut h, files.global_mailmap.as_deref())?;
    Ok(format!("{:08x}", h.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn fnv1_reference_values() {
        // Reference vectors for 32-bit FNV-1.
        assert_eq!(fnv32_hex(b""), "811c9dc5");
        assert_eq!(fnv32_hex(b"a"), "050c5d7e");
        assert_eq!(fnv32_hex(b"foobar"), "31f0b262");
    }

    #[test]
    fn fingerprint_changes_with_mailmap_content() {
        let dir = tempfile::tempdir().unwrap();
        let mailmap = dir.path().join(".mailmap");

        let mut f = fs::File::create(&mailmap).unwrap();
        writeln!(f, "Bob <bob@new> <bob@old>").unwrap();
        drop(f);

        let files = SupplementalFiles {
            repo_mailmap: Some(mailmap.clone()),
            ..Default::default()
        };
        let first = repo_state_fingerprint(&files).unwrap();

        let mut f = fs::File::create(&mailmap).unwrap();
        writeln!(f, "Jim <jim@new> <jim@old>").unwrap();
        drop(f);

        let second = repo_state_fingerprint(&files).unwrap();
        assert_ne!(first, second);
        assert_eq!(first.len(), 8);
    }

    #[test]
    fn fingerprint_without_mailmaps_is_offset_basis() {
        let files = SupplementalFiles::default();
        assert_eq!(repo_state_fingerprint(&files).unwrap(), "811c9dc5");
    }
}
