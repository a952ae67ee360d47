//! Blocking reader/writer lock keyed by opaque tokens.
//!
//! Reading and writing are mutually exclusive: any number of read keys may be
//! outstanding, or exactly one write key, never both. Acquisition blocks the
//! calling thread on a condition variable until the state permits progress.
//! When a writer releases while readers and another writer are both waiting,
//! the readers go first.
//!
//! Every grant and release raises a [`DatasetLockEvent`] before the call that
//! caused it returns. Events are queued in the same critical section as the
//! state change they describe and delivered by one thread at a time outside
//! the state lock, so observers see them in the order the changes happened.
//! Observers may call back into the lock, but must not block on it.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use nucleus_types::{Id, IdTag};
use tracing::trace;

use crate::error::DatasetLockError;

pub struct LockKeyTag;

impl IdTag for LockKeyTag {
    const NAME: &'static str = "DatasetLockKey";
}

/// Token for one granted read or write lock. Keys are strictly increasing and
/// never reused.
pub type DatasetLockKey = Id<LockKeyTag, u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetLockEvent {
    LockedForReading(DatasetLockKey),
    LockedForWriting(DatasetLockKey),
    /// The last outstanding read key was released.
    UnlockedFromReading,
    UnlockedFromWriting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(&DatasetLockEvent) + Send + Sync>;

/// The seam the dataset layer depends on.
pub trait TrackDatasetLocks: Send + Sync {
    fn lock_for_reading(&self) -> DatasetLockKey;
    fn lock_for_writing(&self) -> DatasetLockKey;
    fn remove_read_lock(&self, key: DatasetLockKey);
    fn remove_write_lock(&self, key: DatasetLockKey);
    fn is_locked_for_reading(&self) -> bool;
    fn is_locked_for_writing(&self) -> bool;
}

#[derive(Debug, Default)]
struct LockState {
    readers: BTreeSet<DatasetLockKey>,
    writer: Option<DatasetLockKey>,
    waiting_readers: usize,
    next_key: u64,
}

impl LockState {
    fn issue_key(&mut self) -> DatasetLockKey {
        let key = DatasetLockKey::new(self.next_key);
        self.next_key += 1;
        key
    }

    fn writer_must_wait(&self) -> bool {
        self.writer.is_some() || !self.readers.is_empty() || self.waiting_readers > 0
    }
}

#[derive(Debug, Default)]
struct EventQueue {
    events: VecDeque<(u64, DatasetLockEvent)>,
    queued: u64,
    /// Sequence number of the last event handed to observers.
    delivered: u64,
    delivering: Option<ThreadId>,
}

/// Releases the delivering role even if an observer panics.
struct Delivery<'a> {
    lock: &'a DatasetLock,
    in_flight: Option<u64>,
    finished: bool,
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut queue = self.lock.lock_events();
        if let Some(seq) = self.in_flight {
            queue.delivered = seq;
        }
        queue.delivering = None;
        self.lock.raised.notify_all();
    }
}

#[derive(Default)]
pub struct DatasetLock {
    state: Mutex<LockState>,
    changed: Condvar,
    events: Mutex<EventQueue>,
    raised: Condvar,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    next_observer: Mutex<u64>,
}

impl std::fmt::Debug for DatasetLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("DatasetLock")
            .field("readers", &state.readers.len())
            .field("writer", &state.writer)
            .field("waiting_readers", &state.waiting_readers)
            .finish()
    }
}

impl DatasetLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` for every subsequent lock event.
    pub fn subscribe(&self, observer: impl Fn(&DatasetLockEvent) + Send + Sync + 'static) -> ObserverId {
        let id = {
            let mut next = self.next_observer.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            ObserverId(*next)
        };
        self.lock_observers().push((id, Arc::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.lock_observers();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Grants a read key, blocking while a write key is outstanding.
    pub fn lock_for_reading(&self) -> DatasetLockKey {
        let (key, seq) = {
            let mut state = self.lock_state();
            if state.writer.is_some() {
                state.waiting_readers += 1;
                state = self
                    .changed
                    .wait_while(state, |s| s.writer.is_some())
                    .unwrap_or_else(PoisonError::into_inner);
                state.waiting_readers -= 1;
            }
            let key = state.issue_key();
            state.readers.insert(key);
            (key, self.queue(DatasetLockEvent::LockedForReading(key)))
        };
        trace!(key = ?key, "granted read lock");
        self.deliver(seq);
        key
    }

    /// Grants a read key only if that is possible without blocking.
    pub fn try_lock_for_reading(&self) -> Option<DatasetLockKey> {
        let (key, seq) = {
            let mut state = self.lock_state();
            if state.writer.is_some() {
                return None;
            }
            let key = state.issue_key();
            state.readers.insert(key);
            (key, self.queue(DatasetLockEvent::LockedForReading(key)))
        };
        self.deliver(seq);
        Some(key)
    }

    /// Grants the write key, blocking while any read key or another write key
    /// is outstanding, or while readers are queued behind a writer.
    pub fn lock_for_writing(&self) -> DatasetLockKey {
        let (key, seq) = {
            let state = self.lock_state();
            let mut state = self
                .changed
                .wait_while(state, |s| s.writer_must_wait())
                .unwrap_or_else(PoisonError::into_inner);
            let key = state.issue_key();
            state.writer = Some(key);
            (key, self.queue(DatasetLockEvent::LockedForWriting(key)))
        };
        trace!(key = ?key, "granted write lock");
        self.deliver(seq);
        key
    }

    pub fn try_lock_for_writing(&self) -> Option<DatasetLockKey> {
        let (key, seq) = {
            let mut state = self.lock_state();
            if state.writer_must_wait() {
                return None;
            }
            let key = state.issue_key();
            state.writer = Some(key);
            (key, self.queue(DatasetLockEvent::LockedForWriting(key)))
        };
        self.deliver(seq);
        Some(key)
    }

    /// Releases a read key.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not an outstanding read key; see
    /// [`DatasetLock::try_remove_read_lock`] for the non-panicking form.
    pub fn remove_read_lock(&self, key: DatasetLockKey) {
        if let Err(err) = self.try_remove_read_lock(key) {
            panic!("dataset lock misuse: {err}");
        }
    }

    pub fn try_remove_read_lock(&self, key: DatasetLockKey) -> Result<(), DatasetLockError> {
        let released_last = {
            let mut state = self.lock_state();
            if !state.readers.remove(&key) {
                return Err(DatasetLockError::UnknownReadKey(key));
            }
            state
                .readers
                .is_empty()
                .then(|| self.queue(DatasetLockEvent::UnlockedFromReading))
        };
        trace!(key = ?key, "released read lock");
        if let Some(seq) = released_last {
            self.changed.notify_all();
            self.deliver(seq);
        }
        Ok(())
    }

    /// Releases the write key.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not the outstanding write key.
    pub fn remove_write_lock(&self, key: DatasetLockKey) {
        if let Err(err) = self.try_remove_write_lock(key) {
            panic!("dataset lock misuse: {err}");
        }
    }

    pub fn try_remove_write_lock(&self, key: DatasetLockKey) -> Result<(), DatasetLockError> {
        let seq = {
            let mut state = self.lock_state();
            if state.writer != Some(key) {
                return Err(DatasetLockError::UnknownWriteKey(key));
            }
            state.writer = None;
            self.queue(DatasetLockEvent::UnlockedFromWriting)
        };
        trace!(key = ?key, "released write lock");
        self.changed.notify_all();
        self.deliver(seq);
        Ok(())
    }

    pub fn is_locked_for_reading(&self) -> bool {
        !self.lock_state().readers.is_empty()
    }

    pub fn is_locked_for_writing(&self) -> bool {
        self.lock_state().writer.is_some()
    }

    pub fn read_lock_count(&self) -> usize {
        self.lock_state().readers.len()
    }

    /// Must be called with the state lock held. Returns the event's sequence
    /// number.
    fn queue(&self, event: DatasetLockEvent) -> u64 {
        let mut queue = self.lock_events();
        queue.queued += 1;
        let seq = queue.queued;
        queue.events.push_back((seq, event));
        seq
    }

    /// Returns once event `seq` has been raised. Whoever finds nobody
    /// delivering drains the queue; a call made from inside an observer only
    /// queues, and the delivering loop picks its event up.
    fn deliver(&self, seq: u64) {
        let me = thread::current().id();
        let mut queue = self.lock_events();
        loop {
            if queue.delivered >= seq {
                return;
            }
            match queue.delivering {
                Some(owner) if owner == me => return,
                Some(_) => {
                    queue = self
                        .raised
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                None => break,
            }
        }
        queue.delivering = Some(me);

        let mut delivery = Delivery {
            lock: self,
            in_flight: None,
            finished: false,
        };
        loop {
            let Some((next, event)) = queue.events.pop_front() else {
                queue.delivering = None;
                delivery.finished = true;
                self.raised.notify_all();
                return;
            };
            delivery.in_flight = Some(next);
            drop(queue);
            self.raise(&event);
            queue = self.lock_events();
            queue.delivered = next;
            delivery.in_flight = None;
            self.raised.notify_all();
        }
    }

    fn raise(&self, event: &DatasetLockEvent) {
        // Snapshot so observers may call back into the lock.
        let observers: Vec<Observer> = self
            .lock_observers()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_events(&self) -> MutexGuard<'_, EventQueue> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_observers(&self) -> MutexGuard<'_, Vec<(ObserverId, Observer)>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TrackDatasetLocks for DatasetLock {
    fn lock_for_reading(&self) -> DatasetLockKey {
        DatasetLock::lock_for_reading(self)
    }

    fn lock_for_writing(&self) -> DatasetLockKey {
        DatasetLock::lock_for_writing(self)
    }

    fn remove_read_lock(&self, key: DatasetLockKey) {
        DatasetLock::remove_read_lock(self, key)
    }

    fn remove_write_lock(&self, key: DatasetLockKey) {
        DatasetLock::remove_write_lock(self, key)
    }

    fn is_locked_for_reading(&self) -> bool {
        DatasetLock::is_locked_for_reading(self)
    }

    fn is_locked_for_writing(&self) -> bool {
        DatasetLock::is_locked_for_writing(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded(lock: &DatasetLock) -> Arc<Mutex<Vec<DatasetLockEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        lock.subscribe(move |event| sink.lock().unwrap().push(*event));
        events
    }

    #[test]
    fn readers_share_the_lock() {
        let lock = DatasetLock::new();
        let first = lock.lock_for_reading();
        let second = lock.lock_for_reading();
        assert_ne!(first, second);
        assert!(lock.is_locked_for_reading());
        assert!(!lock.is_locked_for_writing());
        assert_eq!(lock.read_lock_count(), 2);
        assert!(lock.try_lock_for_writing().is_none());

        lock.remove_read_lock(first);
        assert!(lock.is_locked_for_reading());
        lock.remove_read_lock(second);
        assert!(!lock.is_locked_for_reading());
    }

    #[test]
    fn every_grant_raises_an_event_and_last_release_unlocks() {
        let lock = DatasetLock::new();
        let events = recorded(&lock);

        let r1 = lock.lock_for_reading();
        let r2 = lock.lock_for_reading();
        lock.remove_read_lock(r1);
        lock.remove_read_lock(r2);
        let w = lock.lock_for_writing();
        lock.remove_write_lock(w);

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                DatasetLockEvent::LockedForReading(r1),
                DatasetLockEvent::LockedForReading(r2),
                DatasetLockEvent::UnlockedFromReading,
                DatasetLockEvent::LockedForWriting(w),
                DatasetLockEvent::UnlockedFromWriting,
            ]
        );
    }

    #[test]
    fn keys_are_strictly_increasing() {
        let lock = DatasetLock::new();
        let a = lock.lock_for_reading();
        lock.remove_read_lock(a);
        let b = lock.lock_for_writing();
        lock.remove_write_lock(b);
        let c = lock.lock_for_reading();
        assert!(a < b && b < c);
    }

    #[test]
    fn writer_excludes_readers_without_blocking_try() {
        let lock = DatasetLock::new();
        let w = lock.try_lock_for_writing().unwrap();
        assert!(lock.is_locked_for_writing());
        assert!(lock.try_lock_for_reading().is_none());
        assert!(lock.try_lock_for_writing().is_none());
        lock.remove_write_lock(w);
        assert!(lock.try_lock_for_reading().is_some());
    }

    #[test]
    fn releasing_unknown_keys_is_an_error() {
        let lock = DatasetLock::new();
        let r = lock.lock_for_reading();
        assert_eq!(
            lock.try_remove_write_lock(r),
            Err(DatasetLockError::UnknownWriteKey(r))
        );
        lock.remove_read_lock(r);
        assert_eq!(
            lock.try_remove_read_lock(r),
            Err(DatasetLockError::UnknownReadKey(r))
        );
    }

    #[test]
    #[should_panic(expected = "dataset lock misuse")]
    fn double_release_panics() {
        let lock = DatasetLock::new();
        let w = lock.lock_for_writing();
        lock.remove_write_lock(w);
        lock.remove_write_lock(w);
    }

    #[test]
    fn unsubscribed_observers_stop_receiving() {
        let lock = DatasetLock::new();
        let events = Arc::new(Mutex::new(0usize));
        let sink = events.clone();
        let id = lock.subscribe(move |_| *sink.lock().unwrap() += 1);
        let r = lock.lock_for_reading();
        assert!(lock.unsubscribe(id));
        lock.remove_read_lock(r);
        assert_eq!(*events.lock().unwrap(), 1);
        assert!(!lock.unsubscribe(id));
    }
}
