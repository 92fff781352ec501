//! The parallel fan-out/fan-in tally engine.
//!
//! The revision list (minus cache hits) is cut into fixed-size chunks and
//! pushed through a small task graph of scoped threads wired with bounded
//! channels:
//!
//! ```text
//!   writer ──Q1──> spawner ──Q2──> workers ──results──> main (reduce)
//!                                     │
//!                                     └──batches──> cacher ──> cache.add
//! ```
//!
//! The spawner launches workers lazily, one per chunk seen, up to the CPU
//! count, so a short history never pays for a full worker fleet. Each
//! worker drives its own `git log --stdin` child, tees parsed commits to
//! the cache queue, and sends its partial tally downstream. Because
//! partials combine associatively and commutatively, the main thread can
//! fold them in whatever order they arrive.
//!
//! Every blocking channel operation selects on a shared cancellation
//! token; the first error cancels the token, child processes are killed,
//! and later errors are logged as secondary rather than returned.

use std::collections::HashSet;
use std::thread;

use anyhow::Result;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use indicatif::ProgressBar;
use tracing::{debug, warn};

use crate::cancel::{cancel_pair, CancelSource, CancelToken};
use crate::cache::Cache;
use crate::engine::QueryOpts;
use crate::error::Error;
use crate::git::parse::parse_commits;
use crate::git::pathspec::Pathspecs;
use crate::git::{self, subprocess, Commit};

/// Revisions per worker chunk. Smaller chunks balance load better but pay
/// more per-chunk child process overhead.
pub const CHUNK_SIZE: usize = 1024;

/// Commits per batch sent to the cacher.
const CACHE_BATCH: usize = 1024;

/// A tally operation over an unrealized set of commits that can be divided
/// among workers: how each worker tallies its slice, and how two partials
/// merge.
pub struct TallyOp<F, M> {
    pub tally_fn: F,
    pub combine: M,
}

/// Run a tally operation across workers, consulting and feeding the cache.
pub fn tally<T, F, M>(
    query: &QueryOpts,
    ignored: &HashSet<String>,
    use_mailmap: bool,
    cache: &mut Cache,
    op: TallyOp<F, M>,
) -> Result<T>
where
    T: Send + Default,
    F: Fn(&mut dyn Iterator<Item = Result<Commit>>) -> Result<T> + Sync,
    M: Fn(T, T) -> T,
{
    let pathspecs = Pathspecs::parse(&query.pathspecs)?;

    let revs: Vec<String> = git::rev_list(&query.revs, &query.pathspecs, &query.filters)?
        .into_iter()
        .filter(|rev| !ignored.contains(rev))
        .collect();
    debug!(count = revs.len(), "got full revision list");

    if let Err(err) = cache.open() {
        warn!("cache unavailable, proceeding without: {err:#}");
        *cache = Cache::noop();
        cache.open()?;
    }

    let result = run(query, use_mailmap, &pathspecs, revs, cache, op);

    if let Err(err) = cache.close() {
        warn!("error closing cache: {err:#}");
    }

    result
}

fn run<T, F, M>(
    query: &QueryOpts,
    use_mailmap: bool,
    pathspecs: &Pathspecs,
    revs: Vec<String>,
    cache: &mut Cache,
    op: TallyOp<F, M>,
) -> Result<T>
where
    T: Send + Default,
    F: Fn(&mut dyn Iterator<Item = Result<Commit>>) -> Result<T> + Sync,
    M: Fn(T, T) -> T,
{
    let n_cpu = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let total_chunks = revs.len().div_ceil(CHUNK_SIZE) + 1;

    // Progress in units of chunks; only worth showing when there is more
    // work than a single round of workers. Hidden automatically when
    // stderr is not a terminal.
    let bar = if query.show_progress && total_chunks > n_cpu {
        ProgressBar::new(total_chunks as u64)
    } else {
        ProgressBar::hidden()
    };

    // -- Cache phase: readers drain before any worker starts --
    let mut acc = T::default();
    let mut hits: HashSet<String> = HashSet::new();
    {
        let cached = cache.get(&revs)?;
        let mut cached = cached.map(|item| {
            item.map(|mut commit| {
                hits.insert(commit.hash.clone());
                pathspecs.limit_diffs(&mut commit);
                commit
            })
        });
        let cached_tally = (op.tally_fn)(&mut cached)?;
        acc = (op.combine)(acc, cached_tally);
    }
    debug!(hits = hits.len(), "tallied commits from cache");
    bar.inc(1);

    let remaining: Vec<String> = revs
        .into_iter()
        .filter(|rev| !hits.contains(rev))
        .collect();

    if remaining.is_empty() {
        bar.finish_and_clear();
        return Ok(acc);
    }

    let num_chunks = remaining.len().div_ceil(CHUNK_SIZE);
    let max_workers = n_cpu.min(num_chunks).max(1);
    debug!(num_chunks, max_workers, "partitioned remaining revisions");

    let (mut cancel_src, cancel) = cancel_pair();

    let (q1_tx, q1_rx) = bounded::<Vec<String>>(max_workers);
    let (q2_tx, q2_rx) = bounded::<Vec<String>>(max_workers);
    let (results_tx, results_rx) = bounded::<T>(max_workers);
    let (cache_tx, cache_rx) = bounded::<Vec<Commit>>(max_workers);
    let (errs_tx, errs_rx) = unbounded::<anyhow::Error>();

    let mut first_err: Option<anyhow::Error> = None;

    thread::scope(|s| {
        // Writer: chunk the revision list onto Q1.
        {
            let cancel = cancel.clone();
            let remaining = &remaining;
            s.spawn(move || {
                for chunk in remaining.chunks(CHUNK_SIZE) {
                    crossbeam_channel::select! {
                        send(q1_tx, chunk.to_vec()) -> res => {
                            if res.is_err() {
                                break;
                            }
                        }
                        recv(cancel.chan()) -> _ => break,
                    }
                }
            });
        }

        // Spawner: forward Q1 to Q2, launching workers lazily.
        {
            let worker_ctx = WorkerCtx {
                pathspecs: &query.pathspecs,
                use_mailmap,
                cancel: cancel.clone(),
                tally_fn: &op.tally_fn,
            };
            let cancel = cancel.clone();
            let errs_tx_spawner = errs_tx.clone();

            s.spawn(move || {
                let mut spawned = 0;
                for chunk in q1_rx.iter() {
                    if spawned < max_workers {
                        spawned += 1;
                        let id = spawned;
                        let ctx = worker_ctx.clone();
                        let rx = q2_rx.clone();
                        let results_tx = results_tx.clone();
                        let cache_tx = cache_tx.clone();
                        let errs_tx = errs_tx_spawner.clone();
                        s.spawn(move || run_worker(id, ctx, rx, results_tx, cache_tx, errs_tx));
                        debug!(worker = id, "spawned worker");
                    }

                    crossbeam_channel::select! {
                        send(q2_tx, chunk) -> res => {
                            if res.is_err() {
                                break;
                            }
                        }
                        recv(cancel.chan()) -> _ => break,
                    }
                }
            });
        }

        // Cacher: sole writer to the cache for the whole operation.
        {
            let errs_tx = errs_tx.clone();
            s.spawn(move || {
                let mut failed = false;
                for batch in cache_rx.iter() {
                    if failed {
                        continue; // Keep draining so workers never block
                    }
                    if let Err(err) = cache.add(&batch) {
                        failed = true;
                        let _ = errs_tx.send(
                            Error::Task {
                                task: "cacher",
                                source: err,
                            }
                            .into(),
                        );
                    }
                }
            });
        }

        drop(errs_tx); // Main only receives

        // Reduce: fold partials as they arrive, watch for errors.
        let mut open = true;
        while open {
            crossbeam_channel::select! {
                recv(results_rx) -> msg => match msg {
                    Ok(partial) => {
                        let folded = std::mem::take(&mut acc);
                        acc = (op.combine)(folded, partial);
                        bar.inc(1);
                    }
                    Err(_) => open = false, // All workers finished
                },
                recv(errs_rx) -> msg => {
                    if let Ok(err) = msg {
                        note_error(&mut first_err, err, &mut cancel_src);
                    }
                }
            }
        }

        // Workers are done; collect any errors still in flight (the
        // cacher's, or ones that raced the results channel closing).
        for err in errs_rx.iter() {
            note_error(&mut first_err, err, &mut cancel_src);
        }
    });

    bar.finish_and_clear();

    match first_err {
        Some(err) => Err(err),
        None => Ok(acc),
    }
}

fn note_error(
    first_err: &mut Option<anyhow::Error>,
    err: anyhow::Error,
    cancel_src: &mut CancelSource,
) {
    if Error::is_cancellation(&err) || first_err.is_some() {
        debug!("suppressing secondary error: {err:#}");
        return;
    }
    *first_err = Some(err);
    cancel_src.cancel();
}

/// Everything a worker needs, shareable across the fleet.
struct WorkerCtx<'a, F> {
    pathspecs: &'a [String],
    use_mailmap: bool,
    cancel: CancelToken,
    tally_fn: &'a F,
}

impl<F> Clone for WorkerCtx<'_, F> {
    fn clone(&self) -> Self {
        WorkerCtx {
            pathspecs: self.pathspecs,
            use_mailmap: self.use_mailmap,
            cancel: self.cancel.clone(),
            tally_fn: self.tally_fn,
        }
    }
}

/// A tally worker managing its own `git log` subprocess per chunk.
fn run_worker<T, F>(
    id: usize,
    ctx: WorkerCtx<'_, F>,
    chunks: Receiver<Vec<String>>,
    results: Sender<T>,
    to_cache: Sender<Vec<Commit>>,
    errs: Sender<anyhow::Error>,
) where
    T: Send,
    F: Fn(&mut dyn Iterator<Item = Result<Commit>>) -> Result<T> + Sync,
{
    debug!(worker = id, "worker started");

    loop {
        let chunk = crossbeam_channel::select! {
            recv(chunks) -> msg => match msg {
                Ok(chunk) => chunk,
                Err(_) => break, // Input closed; we're done
            },
            recv(ctx.cancel.chan()) -> _ => {
                let _ = errs.send(Error::Cancelled.into());
                break;
            }
        };

        match tally_chunk(&ctx, &chunk, &to_cache) {
            Ok(partial) => {
                crossbeam_channel::select! {
                    send(results, partial) -> res => {
                        if res.is_err() {
                            break;
                        }
                    }
                    recv(ctx.cancel.chan()) -> _ => break,
                }
            }
            Err(err) => {
                let _ = errs.send(
                    Error::Task {
                        task: "worker",
                        source: err.context(format!("error in worker {id}")),
                    }
                    .into(),
                );
                break;
            }
        }
    }

    debug!(worker = id, "worker exited");
}

fn tally_chunk<T, F>(
    ctx: &WorkerCtx<'_, F>,
    chunk: &[String],
    to_cache: &Sender<Vec<Commit>>,
) -> Result<T>
where
    T: Send,
    F: Fn(&mut dyn Iterator<Item = Result<Commit>>) -> Result<T> + Sync,
{
    debug!(count = chunk.len(), "worker received revs");

    let mut sub = subprocess::run_stdin_log(ctx.pathspecs, true, ctx.use_mailmap)?;
    let _kill = sub.kill_on_cancel(&ctx.cancel);

    subprocess::write_revs(&mut sub, chunk)?;

    let fields = sub.stdout_fields()?;
    let mut tee = CacheTee {
        inner: parse_commits(fields),
        buf: Vec::new(),
        to_cache,
        cancel: &ctx.cancel,
        dead: false,
    };

    let partial = (ctx.tally_fn)(&mut tee);
    if partial.is_ok() {
        tee.flush();
    }
    drop(tee); // Release the stdout pipe before reaping

    let waited = sub.wait();
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled.into());
    }
    waited?;

    partial
}

/// Transparently splits commits off to the cache queue in fixed batches.
struct CacheTee<'a, I> {
    inner: I,
    buf: Vec<Commit>,
    to_cache: &'a Sender<Vec<Commit>>,
    cancel: &'a CancelToken,
    dead: bool,
}

impl<I> CacheTee<'_, I> {
    fn send(&mut self, batch: Vec<Commit>) {
        if self.dead {
            return;
        }
        crossbeam_channel::select! {
            send(self.to_cache, batch) -> res => {
                if res.is_err() {
                    self.dead = true;
                }
            }
            recv(self.cancel.chan()) -> _ => self.dead = true,
        }
    }

    fn flush(&mut self) {
        if !self.buf.is_empty() {
            let batch = std::mem::take(&mut self.buf);
            self.send(batch);
        }
    }
}

impl<I> Iterator for CacheTee<'_, I>
where
    I: Iterator<Item = Result<Commit>>,
{
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        if let Ok(commit) = &item {
            self.buf.push(commit.clone());
            if self.buf.len() >= CACHE_BATCH {
                let batch = std::mem::take(&mut self.buf);
                self.send(batch);
            }
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testutil::commit;

    #[test]
    fn cache_tee_batches_and_flushes() {
        let (tx, rx) = unbounded();
        let (_src, cancel) = cancel_pair();

        let commits: Vec<Result<Commit>> = (0..5)
            .map(|i| Ok(commit(&format!("c{i}"), "bob", "bob@x", i, &[])))
            .collect();

        let mut tee = CacheTee {
            inner: commits.into_iter(),
            buf: Vec::new(),
            to_cache: &tx,
            cancel: &cancel,
            dead: false,
        };

        let seen: Vec<_> = tee.by_ref().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(seen.len(), 5);

        tee.flush();
        drop(tee);
        drop(tx);

        let batches: Vec<Vec<Commit>> = rx.iter().collect();
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn cache_tee_stops_sending_when_cancelled() {
        let (tx, rx) = bounded(0); // No capacity: sends would block
        let (mut src, cancel) = cancel_pair();
        src.cancel();

        let commits: Vec<Result<Commit>> =
            vec![Ok(commit("c0", "bob", "bob@x", 0, &[]))];

        let mut tee = CacheTee {
            inner: commits.into_iter(),
            buf: Vec::new(),
            to_cache: &tx,
            cancel: &cancel,
            dead: false,
        };

        let seen: Vec<_> = tee.by_ref().collect();
        assert_eq!(seen.len(), 1);
        tee.flush();
        assert!(tee.dead);
        drop(tee);
        drop(tx);
        assert!(rx.iter().next().is_none());
    }
}
