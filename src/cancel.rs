//! Cooperative cancellation shared by the engine's tasks.
//!
//! The token is a crossbeam channel that is never sent on. Cancelling drops
//! the sender, which makes every clone of the receiver ready in a `select!`
//! and makes `is_cancelled` observable without blocking. Dropping the source
//! (e.g. during unwinding) cancels implicitly, so tasks can never outlive
//! the operation that spawned them.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

/// Uninhabited message type: the cancellation channel only ever disconnects.
pub enum Never {}

/// The cancelling side. Owned by whichever task coordinates the others.
pub struct CancelSource {
    tx: Option<Sender<Never>>,
}

/// The observing side. Cheap to clone; one per task.
#[derive(Clone)]
pub struct CancelToken {
    rx: Receiver<Never>,
}

/// Create a linked source/token pair.
pub fn cancel_pair() -> (CancelSource, CancelToken) {
    let (tx, rx) = bounded(0);
    (CancelSource { tx: Some(tx) }, CancelToken { rx })
}

impl CancelSource {
    /// Signal cancellation. Idempotent.
    pub fn cancel(&mut self) {
        self.tx.take();
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// The underlying channel, for use in `select!` arms.
    pub fn chan(&self) -> &Receiver<Never> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_observes_explicit_cancel() {
        let (mut source, token) = cancel_pair();
        assert!(!token.is_cancelled());
        source.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn dropping_source_cancels() {
        let (source, token) = cancel_pair();
        drop(source);
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_the_signal() {
        let (mut source, token) = cancel_pair();
        let other = token.clone();
        source.cancel();
        assert!(token.is_cancelled());
        assert!(other.is_cancelled());
    }
}
