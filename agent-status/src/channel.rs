//! Bounded intake channels: one per event kind.
//!
//! The two "bulk" kinds (`plugin_statuses`, `bulk_bundle_statuses`) and the
//! deprecated `single_bundle_status` channel use [`Mailbox`], a capacity-1,
//! oldest-wins slot built on `tokio::sync::watch` — overwriting an unread
//! value is exactly what `watch::Sender::send` does, so the non-blocking
//! producer side falls out for free; a drop counter on top tracks how many
//! updates were overwritten before the loop observed them.
//!
//! `discovery_status` and `decision_log_status` are synchronous rendezvous
//! channels, approximated with a capacity-1 `tokio::sync::mpsc` channel used
//! with a plain `.send().await` — tokio has no true zero-capacity channel,
//! but capacity-1 plus a blocking send gives the same "producer waits for
//! the loop to consume" behavior.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// A single-slot, oldest-wins mailbox. Sending never blocks; a send that
/// overwrites a value the receiver has not yet observed counts as a drop.
pub struct Mailbox<T> {
    tx: watch::Sender<Option<T>>,
    pending: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

pub struct MailboxReceiver<T> {
    rx: watch::Receiver<Option<T>>,
    pending: Arc<AtomicBool>,
}

/// Creates a connected mailbox sender/receiver pair.
pub fn mailbox<T: Clone>() -> (Mailbox<T>, MailboxReceiver<T>) {
    let (tx, rx) = watch::channel(None);
    let pending = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        Mailbox {
            tx,
            pending: pending.clone(),
            dropped,
        },
        MailboxReceiver { rx, pending },
    )
}

impl<T> Mailbox<T> {
    /// Enqueue a value, overwriting whatever is there. Never blocks.
    pub fn send(&self, value: T) {
        if self.pending.swap(true, Ordering::AcqRel) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        // A closed receiver only happens once the owning component has shut
        // down; there is nothing useful to do with the error at that point.
        let _ = self.tx.send(Some(value));
    }

    /// Count of updates dropped because a previous value went unread.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T: Clone> MailboxReceiver<T> {
    /// Wait for the next value, clearing the pending flag.
    pub async fn recv(&mut self) -> T {
        loop {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
            self.pending.store(false, Ordering::Release);
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return value;
            }
        }
    }

    /// Non-blockingly take a pending value, if any, without waiting.
    /// Used by the query/trigger drain step.
    pub fn try_drain(&mut self) -> Option<T> {
        if !self.pending.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.rx.borrow_and_update().clone()
    }
}

/// Create a synchronous rendezvous channel pair: capacity 1, the producer's
/// `send` awaits until the loop drains the value.
pub fn rendezvous<T>() -> (tokio::sync::mpsc::Sender<T>, tokio::sync::mpsc::Receiver<T>) {
    tokio::sync::mpsc::channel(1)
}
