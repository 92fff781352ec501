//! Runs git as a subprocess and adapts its stdio streams.
//!
//! Everything the tool knows about a repository comes through here: `git
//! log` for commits (range mode and `--stdin` mode for the workers),
//! `rev-list` for the revision partition, `rev-parse`, `ls-files`, and
//! `config --get`. Output is consumed incrementally; a non-zero exit is
//! surfaced together with captured stderr after the streams are drained.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use tracing::debug;

use crate::cancel::{CancelToken, Never};
use crate::error::Error;

const LOG_FORMAT: &str = "--pretty=format:%H%x00%h%x00%p%x00%an%x00%ae%x00%ad%x00";
const MAILMAP_LOG_FORMAT: &str = "--pretty=format:%H%x00%h%x00%p%x00%aN%x00%aE%x00%ad%x00";

/// Date and author filters forwarded to git.
#[derive(Debug, Clone, Default)]
pub struct LogFilters {
    pub since: Option<String>,
    pub until: Option<String>,
    pub authors: Vec<String>,
    pub nauthors: Vec<String>,
}

impl LogFilters {
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(since) = &self.since {
            args.push("--since".to_string());
            args.push(since.clone());
        }

        if let Some(until) = &self.until {
            args.push("--until".to_string());
            args.push(until.clone());
        }

        for author in &self.authors {
            args.push("--author".to_string());
            args.push(author.clone());
        }

        if !self.nauthors.is_empty() {
            // Negative author matching needs a negative lookahead, which
            // plain POSIX regexes don't have.
            args.push("--perl-regexp".to_string());
            args.push("--author".to_string());
            args.push(format!("^((?!{}).*)$", self.nauthors.join("|")));
        }

        args
    }
}

/// A running git child process with piped stdio.
pub struct Subprocess {
    child: Arc<Mutex<Child>>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl Subprocess {
    /// Writer for the child's stdin. Dropping the writer closes the pipe,
    /// which is how `git log --stdin` learns the revision list is done.
    pub fn stdin_writer(&mut self) -> Result<std::io::BufWriter<ChildStdin>> {
        let stdin = self
            .stdin
            .take()
            .context("subprocess was started without a stdin pipe")?;
        Ok(std::io::BufWriter::new(stdin))
    }

    /// Iterator over NUL-delimited fields of stdout.
    pub fn stdout_fields(&mut self) -> Result<NullFields> {
        let stdout = self.stdout.take().context("stdout already consumed")?;
        Ok(NullFields {
            reader: BufReader::new(stdout),
            done: false,
        })
    }

    /// Iterator over newline-delimited lines of stdout.
    pub fn stdout_lines(&mut self) -> Result<impl Iterator<Item = std::io::Result<String>>> {
        let stdout = self.stdout.take().context("stdout already consumed")?;
        Ok(BufReader::new(stdout).lines())
    }

    /// All of stdout as trimmed text.
    pub fn stdout_text(&mut self) -> Result<String> {
        let mut stdout = self.stdout.take().context("stdout already consumed")?;
        let mut text = String::new();
        stdout
            .read_to_string(&mut text)
            .context("could not read git stdout")?;
        Ok(text.trim().to_string())
    }

    /// Kill the child when `token` is cancelled. The returned guard stands
    /// down the watcher when dropped.
    pub fn kill_on_cancel(&self, token: &CancelToken) -> KillGuard {
        let (done_tx, done_rx) = bounded::<Never>(0);
        let child = Arc::clone(&self.child);
        let cancel = token.clone();

        std::thread::spawn(move || {
            crossbeam_channel::select! {
                recv(cancel.chan()) -> _ => {
                    if let Ok(mut child) = child.lock() {
                        let _ = child.kill();
                    }
                }
                recv(done_rx) -> _ => {}
            }
        });

        KillGuard { _done: done_tx }
    }

    /// Reap the child. Reads any stderr output first so a failure report
    /// has something useful in it.
    pub fn wait(self) -> Result<()> {
        let mut child = self
            .child
            .lock()
            .map_err(|_| anyhow::anyhow!("subprocess mutex poisoned"))?;

        let mut stderr = String::new();
        if let Some(pipe) = child.stderr.as_mut() {
            let _ = pipe.read_to_string(&mut stderr);
        }

        let status = child.wait().context("could not wait on git subprocess")?;
        debug!(code = status.code(), "git subprocess exited");

        if status.success() {
            Ok(())
        } else {
            Err(Error::Subprocess {
                code: status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            }
            .into())
        }
    }
}

/// Keeps a kill watcher alive; dropping it releases the watcher thread.
pub struct KillGuard {
    _done: crossbeam_channel::Sender<Never>,
}

/// Splits a byte stream on NUL. A trailing unterminated field is yielded
/// as-is at EOF.
pub struct NullFields {
    reader: BufReader<ChildStdout>,
    done: bool,
}

impl Iterator for NullFields {
    type Item = std::io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = Vec::new();
        match self.reader.read_until(b'\0', &mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                if buf.last() == Some(&b'\0') {
                    buf.pop();
                } else {
                    self.done = true;
                }
                Some(Ok(String::from_utf8_lossy(&buf).into_owned()))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

fn run(args: Vec<String>, need_stdin: bool) -> Result<Subprocess> {
    debug!(?args, "running git subprocess");

    let mut cmd = Command::new("git");
    cmd.args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if need_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let mut child = cmd.spawn().context("failed to start git subprocess")?;
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();

    Ok(Subprocess {
        child: Arc::new(Mutex::new(child)),
        stdin,
        stdout,
    })
}

fn log_base_args(use_mailmap: bool, need_diffs: bool) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "log".to_string(),
        if use_mailmap {
            MAILMAP_LOG_FORMAT.to_string()
        } else {
            LOG_FORMAT.to_string()
        },
        "-z".to_string(),
        "--date=unix".to_string(),
        "--reverse".to_string(),
        "--no-show-signature".to_string(),
    ];

    if !use_mailmap {
        args.push("--no-mailmap".to_string());
    }

    if need_diffs {
        args.push("--numstat".to_string());
    }

    args
}

fn with_pathspecs(mut args: Vec<String>, pathspecs: &[String]) -> Vec<String> {
    if !pathspecs.is_empty() {
        args.push("--".to_string());
        args.extend(pathspecs.iter().cloned());
    }
    args
}

/// `git log` over a revision range.
pub fn run_log(
    revs: &[String],
    pathspecs: &[String],
    filters: &LogFilters,
    need_diffs: bool,
    use_mailmap: bool,
) -> Result<Subprocess> {
    let mut args = log_base_args(use_mailmap, need_diffs);
    args.extend(filters.to_args());
    args.extend(revs.iter().cloned());
    run(with_pathspecs(args, pathspecs), false)
        .context("failed to run git log")
}

/// `git log --stdin --no-walk`: revisions are fed one per line on stdin.
/// Pathspecs don't limit which commits are shown, but do limit their diffs.
pub fn run_stdin_log(
    pathspecs: &[String],
    need_diffs: bool,
    use_mailmap: bool,
) -> Result<Subprocess> {
    let mut args = log_base_args(use_mailmap, need_diffs);
    args.push("--stdin".to_string());
    args.push("--no-walk".to_string());
    run(with_pathspecs(args, pathspecs), true)
        .context("failed to run git log --stdin")
}

/// `git rev-list --reverse` for the full revision partition.
pub fn run_rev_list(
    revs: &[String],
    pathspecs: &[String],
    filters: &LogFilters,
) -> Result<Subprocess> {
    anyhow::ensure!(!revs.is_empty(), "git rev-list requires a revision spec");

    let mut args = vec!["rev-list".to_string(), "--reverse".to_string()];
    args.extend(filters.to_args());
    args.extend(revs.iter().cloned());
    run(with_pathspecs(args, pathspecs), false)
        .context("failed to run git rev-list")
}

/// `git rev-parse --show-toplevel`.
pub fn run_rev_parse_toplevel() -> Result<Subprocess> {
    let args = vec!["rev-parse".to_string(), "--show-toplevel".to_string()];
    run(args, false).context("failed to run git rev-parse")
}

/// `git ls-files -z --exclude-standard` under the given pathspecs.
pub fn run_ls_files(pathspecs: &[String]) -> Result<Subprocess> {
    let mut args = vec![
        "ls-files".to_string(),
        "--exclude-standard".to_string(),
        "-z".to_string(),
    ];
    args.extend(pathspecs.iter().cloned());
    run(args, false).context("failed to run git ls-files")
}

/// `git config --get` for a single key.
pub fn run_config_get(key: &str) -> Result<Subprocess> {
    let args = vec![
        "config".to_string(),
        "--type=path".to_string(),
        "--get".to_string(),
        key.to_string(),
    ];
    run(args, false).context("failed to run git config")
}

/// Write revisions one per line to the child's stdin, then close the pipe.
pub fn write_revs(subprocess: &mut Subprocess, revs: &[String]) -> Result<()> {
    let mut writer = subprocess.stdin_writer()?;
    for rev in revs {
        writeln!(writer, "{rev}").context("could not write revision to git stdin")?;
    }
    writer.flush().context("could not flush git stdin")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_to_args() {
        let filters = LogFilters {
            since: Some("6 months ago".to_string()),
            until: None,
            authors: vec!["bob".to_string()],
            nauthors: vec![],
        };
        let args = filters.to_args();
        assert_eq!(args, vec!["--since", "6 months ago", "--author", "bob"]);
    }

    #[test]
    fn nauthors_build_negative_lookahead() {
        let filters = LogFilters {
            nauthors: vec!["bob".to_string(), "jim".to_string()],
            ..Default::default()
        };
        let args = filters.to_args();
        assert_eq!(args[0], "--perl-regexp");
        assert_eq!(args[2], "^((?!bob|jim).*)$");
    }

    #[test]
    fn log_args_include_numstat_only_when_diffs_needed() {
        let args = log_base_args(false, false);
        assert!(!args.contains(&"--numstat".to_string()));
        let args = log_base_args(false, true);
        assert!(args.contains(&"--numstat".to_string()));
    }
}
