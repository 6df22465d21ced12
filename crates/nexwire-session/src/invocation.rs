//! Invocation id allocation and result correlation.
//!
//! The table is shared by the read loop (completing results) and by any
//! number of calling tasks (allocating ids, cancelling). One lock guards it;
//! no await happens while it is held.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use nexwire_frame::UNTRACKED_INVOCATION_ID;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Result, SessionError};

/// What the caller of an invocation eventually observes.
pub type Outcome = Result<Bytes>;

/// Where an outcome is delivered.
pub type CompletionSlot = oneshot::Sender<Outcome>;

struct HandlerEntry {
    generation: u64,
    cancel: CancellationToken,
}

struct Table {
    next_id: u16,
    /// Ids handed out by `next_id(true)` and not yet released.
    tracked: HashSet<u16>,
    pending: HashMap<u16, CompletionSlot>,
    /// Handlers running on this side, keyed by the id the peer chose.
    handlers: HashMap<u16, HandlerEntry>,
    next_generation: u64,
    closed: bool,
}

/// Per-connection table of outstanding invocations in both directions.
pub struct InvocationStateManager {
    table: Mutex<Table>,
}

impl InvocationStateManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                next_id: 1,
                tracked: HashSet::new(),
                pending: HashMap::new(),
                handlers: HashMap::new(),
                next_generation: 0,
                closed: false,
            }),
        }
    }

    /// Allocate an invocation id.
    ///
    /// Untracked invocations all share id 0. Tracked ids increase and wrap,
    /// skipping 0 and any id still outstanding.
    pub fn next_id(&self, track: bool) -> Result<u16> {
        if !track {
            return Ok(UNTRACKED_INVOCATION_ID);
        }
        let mut table = self.table.lock();
        if table.closed {
            return Err(SessionError::ConnectionClosed);
        }
        for _ in 0..u16::MAX {
            let candidate = table.next_id;
            table.next_id = match candidate.wrapping_add(1) {
                0 => 1,
                next => next,
            };
            if table.tracked.insert(candidate) {
                return Ok(candidate);
            }
        }
        Err(SessionError::TooManyInvocations)
    }

    /// Attach the slot an id's outcome is delivered to.
    ///
    /// After `cancel_all` the slot is failed at once.
    pub fn register(&self, id: u16, slot: CompletionSlot) {
        let mut table = self.table.lock();
        if table.closed {
            drop(table);
            let _ = slot.send(Err(SessionError::ConnectionClosed));
            return;
        }
        table.pending.insert(id, slot);
    }

    /// Deliver an outcome and release the id.
    ///
    /// Returns false for unknown ids; late and duplicate frames land here.
    pub fn complete(&self, id: u16, outcome: Outcome) -> bool {
        let slot = {
            let mut table = self.table.lock();
            table.tracked.remove(&id);
            table.pending.remove(&id)
        };
        match slot {
            Some(slot) => {
                let _ = slot.send(outcome);
                true
            }
            None => {
                trace!(invocation_id = id, "completion for unknown invocation ignored");
                false
            }
        }
    }

    /// Fail an id with `Cancelled` and release it.
    ///
    /// Returns false if the id already completed, in which case the caller
    /// keeps whatever outcome was delivered.
    pub fn cancel(&self, id: u16) -> bool {
        self.complete(id, Err(SessionError::Cancelled))
    }

    /// Release an id without delivering anything.
    pub fn remove(&self, id: u16) {
        let mut table = self.table.lock();
        table.tracked.remove(&id);
        table.pending.remove(&id);
    }

    /// Record a running handler so a later cancellation frame can reach it.
    ///
    /// Returns the generation to hand back to [`remove_handler`]. A newer
    /// handler under the same id replaces the older entry.
    ///
    /// [`remove_handler`]: Self::remove_handler
    pub fn register_handler(&self, id: u16, cancel: CancellationToken) -> u64 {
        let mut table = self.table.lock();
        if table.closed {
            cancel.cancel();
        }
        let generation = table.next_generation;
        table.next_generation += 1;
        table
            .handlers
            .insert(id, HandlerEntry { generation, cancel });
        generation
    }

    /// Cancel the handler running under `id`, if any.
    pub fn cancel_handler(&self, id: u16) -> bool {
        let entry = self.table.lock().handlers.remove(&id);
        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => {
                trace!(invocation_id = id, "cancellation for unknown handler ignored");
                false
            }
        }
    }

    /// Forget a finished handler, unless a newer one took its id.
    pub fn remove_handler(&self, id: u16, generation: u64) {
        let mut table = self.table.lock();
        if table
            .handlers
            .get(&id)
            .is_some_and(|entry| entry.generation == generation)
        {
            table.handlers.remove(&id);
        }
    }

    /// Fail every outstanding invocation with `ConnectionClosed` and cancel
    /// every running handler. Later registrations fail immediately.
    /// Idempotent.
    pub fn cancel_all(&self) {
        let (pending, handlers) = {
            let mut table = self.table.lock();
            table.closed = true;
            table.tracked.clear();
            let pending: Vec<CompletionSlot> =
                table.pending.drain().map(|(_, slot)| slot).collect();
            let handlers: Vec<HandlerEntry> =
                table.handlers.drain().map(|(_, entry)| entry).collect();
            (pending, handlers)
        };
        for slot in pending {
            let _ = slot.send(Err(SessionError::ConnectionClosed));
        }
        for entry in handlers {
            entry.cancel.cancel();
        }
    }

    /// Outstanding outbound invocations.
    pub fn outstanding(&self) -> usize {
        self.table.lock().pending.len()
    }

    /// Handlers currently running on this side.
    pub fn running_handlers(&self) -> usize {
        self.table.lock().handlers.len()
    }

    pub fn is_tracked(&self, id: u16) -> bool {
        self.table.lock().tracked.contains(&id)
    }

    pub fn is_closed(&self) -> bool {
        self.table.lock().closed
    }
}

impl Default for InvocationStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InvocationStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("InvocationStateManager")
            .field("tracked", &table.tracked.len())
            .field("pending", &table.pending.len())
            .field("handlers", &table.handlers.len())
            .field("closed", &table.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn ids_increase_and_skip_zero() {
        let manager = InvocationStateManager::new();
        assert_eq!(manager.next_id(true).unwrap(), 1);
        assert_eq!(manager.next_id(true).unwrap(), 2);
        assert_eq!(manager.next_id(false).unwrap(), UNTRACKED_INVOCATION_ID);
        assert_eq!(manager.next_id(true).unwrap(), 3);
    }

    #[test]
    fn wraparound_skips_outstanding_ids() {
        let manager = InvocationStateManager::new();
        let held = manager.next_id(true).unwrap();
        assert_eq!(held, 1);

        for _ in 2..=u16::MAX {
            let id = manager.next_id(true).unwrap();
            manager.remove(id);
        }
        // Wrapped: 0 is skipped and 1 is still held.
        assert_eq!(manager.next_id(true).unwrap(), 2);
        assert!(manager.is_tracked(held));
    }

    #[test]
    fn exhaustion_is_an_error() {
        let manager = InvocationStateManager::new();
        for _ in 0..u16::MAX {
            manager.next_id(true).unwrap();
        }
        assert!(matches!(
            manager.next_id(true),
            Err(SessionError::TooManyInvocations)
        ));
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        let manager = Arc::new(InvocationStateManager::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    (0..4000)
                        .map(|_| manager.next_id(true).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for thread in threads {
            for id in thread.join().unwrap() {
                assert!(seen.insert(id), "id {id} handed out twice");
            }
        }
        assert_eq!(seen.len(), 32000);
    }

    #[test]
    fn complete_delivers_and_releases() {
        let manager = InvocationStateManager::new();
        let id = manager.next_id(true).unwrap();
        let (tx, mut rx) = oneshot::channel();
        manager.register(id, tx);

        assert!(manager.complete(id, Ok(Bytes::from_static(b"ok"))));
        assert_eq!(rx.try_recv().unwrap().unwrap(), Bytes::from_static(b"ok"));
        assert!(!manager.is_tracked(id));
        assert_eq!(manager.outstanding(), 0);

        // A duplicate frame is a silent no-op.
        assert!(!manager.complete(id, Ok(Bytes::new())));
        assert!(!manager.cancel(id));
    }

    #[test]
    fn cancel_racing_complete_has_one_winner() {
        for _ in 0..200 {
            let manager = Arc::new(InvocationStateManager::new());
            let id = manager.next_id(true).unwrap();
            let (tx, mut rx) = oneshot::channel();
            manager.register(id, tx);

            let completer = {
                let manager = manager.clone();
                std::thread::spawn(move || manager.complete(id, Ok(Bytes::from_static(b"v"))))
            };
            let cancelled = manager.cancel(id);
            let completed = completer.join().unwrap();

            assert!(cancelled ^ completed);
            let outcome = rx.try_recv().unwrap();
            if cancelled {
                assert!(matches!(outcome, Err(SessionError::Cancelled)));
            } else {
                assert_eq!(outcome.unwrap(), Bytes::from_static(b"v"));
            }
            assert_eq!(manager.outstanding(), 0);
            assert!(!manager.is_tracked(id));
        }
    }

    #[test]
    fn cancel_all_is_idempotent_and_closes() {
        let manager = InvocationStateManager::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let id = manager.next_id(true).unwrap();
            let (tx, rx) = oneshot::channel();
            manager.register(id, tx);
            receivers.push(rx);
        }
        let handler = CancellationToken::new();
        manager.register_handler(9, handler.clone());

        manager.cancel_all();
        manager.cancel_all();

        for mut rx in receivers {
            assert!(matches!(
                rx.try_recv().unwrap(),
                Err(SessionError::ConnectionClosed)
            ));
        }
        assert!(handler.is_cancelled());
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.running_handlers(), 0);
        assert!(matches!(
            manager.next_id(true),
            Err(SessionError::ConnectionClosed)
        ));

        let (tx, mut rx) = oneshot::channel();
        manager.register(5, tx);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(SessionError::ConnectionClosed)
        ));
    }

    #[test]
    fn handler_cancellation_by_peer_id() {
        let manager = InvocationStateManager::new();
        let token = CancellationToken::new();
        let generation = manager.register_handler(42, token.clone());

        assert!(manager.cancel_handler(42));
        assert!(token.is_cancelled());
        assert!(!manager.cancel_handler(42));

        manager.remove_handler(42, generation);
        assert_eq!(manager.running_handlers(), 0);
    }

    #[test]
    fn stale_handler_removal_keeps_newer_entry() {
        let manager = InvocationStateManager::new();
        let old = manager.register_handler(7, CancellationToken::new());
        let newer = CancellationToken::new();
        manager.register_handler(7, newer.clone());

        manager.remove_handler(7, old);
        assert_eq!(manager.running_handlers(), 1);
        assert!(manager.cancel_handler(7));
        assert!(newer.is_cancelled());
    }
}
