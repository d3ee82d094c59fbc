//! Concurrency tests for the document lock

use crossbeam_channel::bounded;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;
use tidemark::migration::{interrupt_channel, DocumentLock, LockError};
use tidemark::store::MemoryStore;

const INDEX: &str = ".tidemark";
const WAIT: Duration = Duration::from_secs(5);
const NOT_YET: Duration = Duration::from_millis(100);

fn lock_on(store: &Arc<MemoryStore>, key: &str) -> DocumentLock {
    DocumentLock::new(store.clone(), INDEX, key).with_idle_between_tries(Duration::from_millis(5))
}

#[test]
fn test_same_lock_blocks_other_threads() {
    let store = Arc::new(MemoryStore::new());
    let lock = Arc::new(lock_on(&store, "orders"));
    lock.lock();

    let (acquired_tx, acquired_rx) = bounded(1);
    let waiter = {
        let lock = lock.clone();
        thread::spawn(move || {
            lock.lock();
            acquired_tx.send(()).unwrap();
            assert!(lock.is_held_by_current_thread());
            lock.unlock().unwrap();
        })
    };

    assert!(acquired_rx.recv_timeout(NOT_YET).is_err());
    // a thread that does not hold the lock cannot release it
    let intruder = {
        let lock = lock.clone();
        thread::spawn(move || lock.unlock())
    };
    assert!(matches!(intruder.join().unwrap(), Err(LockError::NotHeld)));

    lock.unlock().unwrap();
    acquired_rx.recv_timeout(WAIT).unwrap();
    waiter.join().unwrap();
    assert!(!store.contains_document(INDEX, "lock:orders"));
}

#[test]
fn test_separate_instances_contend_through_store() {
    let store = Arc::new(MemoryStore::new());
    let first = lock_on(&store, "orders");
    let second = Arc::new(lock_on(&store, "orders"));

    first.lock();
    assert!(!second.try_lock(Duration::from_millis(30)));
    assert!(!second.is_held_by_current_thread());

    let (acquired_tx, acquired_rx) = bounded(1);
    let waiter = {
        let second = second.clone();
        thread::spawn(move || {
            second.lock();
            acquired_tx.send(()).unwrap();
            second.unlock().unwrap();
        })
    };

    assert!(acquired_rx.recv_timeout(NOT_YET).is_err());
    first.unlock().unwrap();
    acquired_rx.recv_timeout(WAIT).unwrap();
    waiter.join().unwrap();

    assert!(second.try_lock(Duration::ZERO));
    second.unlock().unwrap();
}

#[test]
fn test_interrupt_abandons_interruptible_wait() {
    let store = Arc::new(MemoryStore::new());
    let holder = lock_on(&store, "orders");
    let waiter_lock = Arc::new(lock_on(&store, "orders"));
    let (interrupter, signal) = interrupt_channel();

    holder.lock();

    let (started_tx, started_rx) = bounded(1);
    let waiter = {
        let lock = waiter_lock.clone();
        thread::spawn(move || {
            started_tx.send(()).unwrap();
            let result = lock.lock_interruptibly(&signal);
            (result, lock.is_held_by_current_thread())
        })
    };

    started_rx.recv_timeout(WAIT).unwrap();
    thread::sleep(Duration::from_millis(20));
    interrupter.interrupt();

    let (result, held) = waiter.join().unwrap();
    assert!(matches!(result, Err(LockError::Interrupted)));
    assert!(!held);
    // the holder's document is untouched
    assert!(store.contains_document(INDEX, "lock:orders"));

    holder.unlock().unwrap();
    assert!(!store.contains_document(INDEX, "lock:orders"));
}

#[test]
fn test_pending_interrupt_fails_next_interruptible_wait() {
    let store = Arc::new(MemoryStore::new());
    let lock = lock_on(&store, "orders");
    let (interrupter, signal) = interrupt_channel();

    interrupter.interrupt();

    assert!(matches!(lock.lock_interruptibly(&signal), Err(LockError::Interrupted)));
    assert!(!store.contains_document(INDEX, "lock:orders"));
    lock.lock_interruptibly(&signal).unwrap();
    lock.unlock().unwrap();
}

#[test]
fn test_interrupt_reaches_its_waiter_while_another_thread_polls() {
    let store = Arc::new(MemoryStore::new());
    let foreign = lock_on(&store, "orders");
    let shared = Arc::new(lock_on(&store, "orders"));
    foreign.lock();

    // this thread owns the local mutex and polls the store
    let (polling_tx, polling_rx) = bounded(1);
    let poller = {
        let lock = shared.clone();
        thread::spawn(move || {
            polling_tx.send(()).unwrap();
            lock.lock();
            lock.unlock().unwrap();
        })
    };
    polling_rx.recv_timeout(WAIT).unwrap();
    thread::sleep(Duration::from_millis(20));

    let (interrupter, signal) = interrupt_channel();
    let (started_tx, started_rx) = bounded(1);
    let waiter = {
        let lock = shared.clone();
        thread::spawn(move || {
            started_tx.send(()).unwrap();
            let result = lock.lock_interruptibly(&signal);
            (result, Instant::now())
        })
    };
    started_rx.recv_timeout(WAIT).unwrap();
    thread::sleep(Duration::from_millis(20));

    let interrupted_at = Instant::now();
    interrupter.interrupt();
    let (result, finished_at) = waiter.join().unwrap();
    assert!(matches!(result, Err(LockError::Interrupted)));
    assert!(finished_at.duration_since(interrupted_at) < Duration::from_millis(500));

    foreign.unlock().unwrap();
    poller.join().unwrap();
    assert!(!store.contains_document(INDEX, "lock:orders"));
}

#[test]
fn test_uninterruptible_lock_ignores_interrupts() {
    let store = Arc::new(MemoryStore::new());
    let holder = lock_on(&store, "orders");
    let waiter_lock = Arc::new(lock_on(&store, "orders"));
    let (interrupter, signal) = interrupt_channel();

    holder.lock();

    let (acquired_tx, acquired_rx) = bounded(1);
    let waiter = {
        let lock = waiter_lock.clone();
        thread::spawn(move || {
            lock.lock();
            acquired_tx.send(()).unwrap();
            lock.unlock().unwrap();
        })
    };

    thread::sleep(Duration::from_millis(20));
    interrupter.interrupt();
    assert!(acquired_rx.recv_timeout(NOT_YET).is_err());

    holder.unlock().unwrap();
    acquired_rx.recv_timeout(WAIT).unwrap();
    waiter.join().unwrap();

    // the interrupt is still pending for whoever waits on the signal
    assert!(matches!(waiter_lock.lock_interruptibly(&signal), Err(LockError::Interrupted)));
}

#[test]
fn test_many_threads_hold_lock_exclusively() {
    let store = Arc::new(MemoryStore::new());
    let inside = Arc::new(parking_lot::Mutex::new(0usize));
    let (done_tx, done_rx) = crossbeam_channel::unbounded();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let lock = lock_on(&store, "orders");
            let inside = inside.clone();
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    lock.lock();
                    {
                        let mut count = inside.lock();
                        *count += 1;
                        assert_eq!(*count, 1, "two holders at once");
                    }
                    thread::sleep(Duration::from_millis(1));
                    *inside.lock() -= 1;
                    lock.unlock().unwrap();
                }
                done_tx.send(()).unwrap();
            })
        })
        .collect();

    for _ in 0..6 {
        done_rx.recv_timeout(Duration::from_secs(30)).unwrap();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!store.contains_document(INDEX, "lock:orders"));
}
