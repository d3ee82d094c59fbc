//! Document-based migration lock
//!
//! Serializes migration execution for one migration key across every process
//! sharing a document store. Two layers:
//!
//! 1. a local, thread-affine reentrant mutex that blocks other threads of this
//!    process and counts nested acquisitions by the owning thread
//! 2. a remote token: the lock document `lock:<migration key>`, created with the
//!    store's atomic create-if-absent. Whoever creates it holds the lock.
//!
//! Acquisition polls the remote create every `idle_between_tries` until it
//! succeeds (or a deadline passes). A timeout too large for the clock waits
//! without a deadline. The lock document has no owner, heartbeat or
//! expiry: if a holder dies before deleting it, the lock stays taken until an
//! operator deletes the document (see [`Migrator::force_unlock`]).
//!
//! [`Migrator::force_unlock`]: crate::migration::Migrator::force_unlock

use crate::migration::record::{lock_document_id, LockDocument};
use crate::store::{DocumentStore, StoreError};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Default pause between remote acquisition attempts
pub const DEFAULT_IDLE_BETWEEN_TRIES: Duration = Duration::from_millis(100);

/// Lock error type
#[derive(Debug, Error)]
pub enum LockError {
    /// `unlock` called by a thread that does not hold the lock
    #[error("Lock is not held by the current thread")]
    NotHeld,

    /// `lock_interruptibly` was interrupted while waiting
    #[error("Interrupted while waiting for the lock")]
    Interrupted,

    /// The lock document could not be deleted; the local mutex was still released
    #[error("Failed to delete lock document: {0}")]
    Release(#[source] StoreError),

    /// Operation the lock does not provide
    #[error("Unsupported lock operation: {0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acquisition {
    /// First acquisition by this thread; the remote token must be taken
    Fresh,
    /// Nested acquisition; the remote token is already held
    Reentrant,
}

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    holds: usize,
}

/// Reentrant mutex owned by one thread at a time
#[derive(Debug, Default)]
struct LocalMutex {
    state: Mutex<Ownership>,
    released: Condvar,
}

impl LocalMutex {
    /// Acquire, waiting until `deadline` (forever if `None`)
    fn acquire(&self, deadline: Option<Instant>) -> Option<Acquisition> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.holds = 1;
                    return Some(Acquisition::Fresh);
                }
                Some(owner) if owner == me => {
                    state.holds += 1;
                    return Some(Acquisition::Reentrant);
                }
                Some(_) => match deadline {
                    None => self.released.wait(&mut state),
                    Some(deadline) => {
                        if Instant::now() >= deadline {
                            return None;
                        }
                        let _ = self.released.wait_until(&mut state, deadline);
                    }
                },
            }
        }
    }

    /// Drop one hold; returns the holds left
    fn release(&self) -> Result<usize, LockError> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return Err(LockError::NotHeld);
        }
        state.holds -= 1;
        if state.holds == 0 {
            state.owner = None;
            self.released.notify_one();
        }
        Ok(state.holds)
    }

    /// Holds of the current thread (0 if another thread or nobody owns it)
    fn hold_count(&self) -> usize {
        let state = self.state.lock();
        if state.owner == Some(thread::current().id()) {
            state.holds
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pause {
    Elapsed,
    Interrupted,
}

/// Create a connected interrupt pair
///
/// The [`InterruptSignal`] belongs to one waiter and is passed to
/// [`DocumentLock::lock_interruptibly`]; the [`Interrupter`] can be cloned and
/// handed to whoever should be able to cancel that wait.
pub fn interrupt_channel() -> (Interrupter, InterruptSignal) {
    let (sender, receiver) = unbounded();
    (Interrupter { sender }, InterruptSignal { receiver })
}

/// Sending half of [`interrupt_channel`]
#[derive(Debug, Clone)]
pub struct Interrupter {
    sender: Sender<()>,
}

impl Interrupter {
    /// Interrupt the current or next wait using the paired signal
    ///
    /// An interrupt sent while nobody waits stays pending until the next
    /// interruptible wait observes it.
    pub fn interrupt(&self) {
        // nothing to do once the signal is gone
        let _ = self.sender.send(());
    }
}

/// Receiving half of [`interrupt_channel`], owned by a single waiter
#[derive(Debug)]
pub struct InterruptSignal {
    receiver: Receiver<()>,
}

impl InterruptSignal {
    fn take_pending(&self) -> bool {
        match self.receiver.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }

    /// Sleep for `duration` unless an interrupt arrives first
    fn pause(&self, duration: Duration) -> Pause {
        match self.receiver.recv_timeout(duration) {
            Ok(()) => Pause::Interrupted,
            Err(RecvTimeoutError::Timeout) => Pause::Elapsed,
            // every interrupter dropped: nobody can interrupt any more
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(duration);
                Pause::Elapsed
            }
        }
    }
}

/// Cross-process migration lock backed by a lock document
pub struct DocumentLock {
    store: Arc<dyn DocumentStore>,
    container: String,
    lock_id: String,
    idle_between_tries: Duration,
    local: LocalMutex,
}

impl DocumentLock {
    /// Lock guarding `migration_key`, with its lock document stored in `container`
    pub fn new(store: Arc<dyn DocumentStore>, container: impl Into<String>, migration_key: &str) -> Self {
        Self {
            store,
            container: container.into(),
            lock_id: lock_document_id(migration_key),
            idle_between_tries: DEFAULT_IDLE_BETWEEN_TRIES,
            local: LocalMutex::default(),
        }
    }

    /// Override the pause between remote acquisition attempts
    #[must_use]
    pub fn with_idle_between_tries(mut self, idle: Duration) -> Self {
        self.idle_between_tries = idle;
        self
    }

    /// Id of the lock document
    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    /// Whether the calling thread holds the lock
    pub fn is_held_by_current_thread(&self) -> bool {
        self.local.hold_count() > 0
    }

    /// Nested holds of the calling thread
    pub fn hold_count(&self) -> usize {
        self.local.hold_count()
    }

    /// Acquire the lock, waiting as long as it takes
    ///
    /// Cannot be interrupted: this only returns once the lock is held. Remote
    /// failures other than a conflict are logged and retried.
    pub fn lock(&self) {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::acquire_lock_span(&self.lock_id).entered();

        let started = Instant::now();
        if self.local.acquire(None) == Some(Acquisition::Reentrant) {
            return;
        }

        while !self.try_acquire_remote() {
            thread::sleep(self.idle_between_tries);
        }

        self.acquired(started);
    }

    /// Acquire the lock unless `signal` is interrupted first
    ///
    /// A pending interrupt fails the call before anything is acquired. Only this
    /// waiter's `signal` is observed; other threads waiting on the same lock are
    /// unaffected.
    ///
    /// # Errors
    ///
    /// Returns `LockError::Interrupted` if interrupted before acquiring; the lock is
    /// then not held.
    pub fn lock_interruptibly(&self, signal: &InterruptSignal) -> Result<(), LockError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::acquire_lock_span(&self.lock_id).entered();

        let started = Instant::now();
        let acquisition = loop {
            if signal.take_pending() {
                return Err(LockError::Interrupted);
            }
            let slice = Instant::now().checked_add(self.idle_between_tries);
            if let Some(acquisition) = self.local.acquire(slice) {
                break acquisition;
            }
        };
        if acquisition == Acquisition::Reentrant {
            return Ok(());
        }

        while !self.try_acquire_remote() {
            if signal.pause(self.idle_between_tries) == Pause::Interrupted {
                info!("Interrupted while waiting for lock [{}]", self.lock_id);
                self.release_local();
                return Err(LockError::Interrupted);
            }
        }

        self.acquired(started);
        Ok(())
    }

    /// Try to acquire the lock within `timeout`
    ///
    /// The local mutex is waited for within the same budget. At least one remote
    /// attempt is made once the local mutex is held. Returns `false`, holding
    /// nothing, if the deadline passes. A timeout past the clock's range, such as
    /// `Duration::MAX`, waits like [`lock`](Self::lock).
    pub fn try_lock(&self, timeout: Duration) -> bool {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::acquire_lock_span(&self.lock_id).entered();

        let started = Instant::now();
        let deadline = started.checked_add(timeout);

        match self.local.acquire(deadline) {
            None => return false,
            Some(Acquisition::Reentrant) => return true,
            Some(Acquisition::Fresh) => {}
        }

        loop {
            if self.try_acquire_remote() {
                self.acquired(started);
                return true;
            }

            let idle = match deadline {
                None => self.idle_between_tries,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.release_local();
                        return false;
                    }
                    self.idle_between_tries.min(deadline - now)
                }
            };
            thread::sleep(idle);
        }
    }

    /// Release one hold of the lock
    ///
    /// Nested holds only decrement the local count. Releasing the last hold deletes
    /// the lock document, then releases the local mutex even if the delete failed.
    ///
    /// # Errors
    ///
    /// - `LockError::NotHeld` if the calling thread does not hold the lock; nothing
    ///   changes
    /// - `LockError::Release` if the lock document could not be deleted
    pub fn unlock(&self) -> Result<(), LockError> {
        match self.local.hold_count() {
            0 => return Err(LockError::NotHeld),
            1 => {}
            _ => {
                self.local.release()?;
                return Ok(());
            }
        }

        let deleted = self.store.delete_by_id(&self.container, &self.lock_id);
        self.local.release()?;

        match deleted {
            Ok(()) => {
                debug!("Released lock [{}]", self.lock_id);
                Ok(())
            }
            Err(e) => Err(LockError::Release(e)),
        }
    }

    /// Condition variables are not supported by this lock
    ///
    /// # Errors
    ///
    /// Always returns `LockError::Unsupported`.
    pub fn new_condition(&self) -> Result<(), LockError> {
        Err(LockError::Unsupported("conditions are not supported"))
    }

    /// One remote attempt; any failure counts as "not acquired"
    fn try_acquire_remote(&self) -> bool {
        #[cfg(feature = "metrics")]
        METRICS.record_lock_attempt();

        let document = LockDocument::now().to_document();
        match self.store.create_if_absent(&self.container, &self.lock_id, &document) {
            Ok(()) => true,
            Err(StoreError::Conflict { .. }) => {
                debug!("Lock [{}] is held elsewhere", self.lock_id);
                false
            }
            Err(e) => {
                info!("Failed to acquire lock [{}]: {}", self.lock_id, e);
                false
            }
        }
    }

    fn release_local(&self) {
        if let Err(e) = self.local.release() {
            warn!("Failed to release local mutex of lock [{}]: {}", self.lock_id, e);
        }
    }

    fn acquired(&self, started: Instant) {
        debug!("Acquired lock [{}] after {:?}", self.lock_id, started.elapsed());
        #[cfg(feature = "metrics")]
        METRICS.observe_lock_wait(started.elapsed());
    }
}
