//! Error kinds surfaced by the tally pipeline.
//!
//! Most call sites use `anyhow` for context chains; the typed variants here
//! exist where behavior depends on the kind of failure (degrading to the
//! noop cache, suppressing errors that follow cancellation, refusing bad
//! flag combinations up front).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The git subprocess exited non-zero. Carries whatever it wrote to
    /// stderr, already trimmed.
    #[error("git exited with code {code}{}", fmt_stderr(.stderr))]
    Subprocess { code: i32, stderr: String },

    /// A malformed record or numstat segment in the git log stream.
    #[error("could not parse commit {commit}: {detail}")]
    Parse { commit: String, detail: String },

    /// A requested revision appeared twice in the cache file.
    #[error("duplicate commit in cache: {0}")]
    DuplicateCacheEntry(String),

    /// One of the engine's tasks failed.
    #[error("{task} failed: {source}")]
    Task {
        task: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Bad input detected at the boundary: unsupported pathspec magic,
    /// mutually exclusive flags, invalid limits.
    #[error("{0}")]
    Usage(String),
}

fn fmt_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(". Error output:\n{stderr}")
    }
}

impl Error {
    /// Whether `err` is (or wraps) a cancellation.
    pub fn is_cancellation(err: &anyhow::Error) -> bool {
        err.chain()
            .any(|cause| matches!(cause.downcast_ref::<Error>(), Some(Error::Cancelled)))
    }
}
