//! Keyed expiration registry
//!
//! Associates an opaque key with a callback and a deadline, fires the
//! callback at most once when the deadline is reached, and allows the
//! deadline to be reset or the registration cancelled at any point
//! before firing. The lock service registers one entry per held lease;
//! the callback force-releases the lock.
//!
//! Each entry runs its own timer task, which keeps `refresh` constant
//! time per key and isolates a slow callback from every other entry.
//! Firing is an irreversible claim: the timer task removes its own map
//! entry under the shard lock, so a refresh or remove that loses the
//! race observes the key as already gone.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};

/// Error type for expiration registry operations
#[derive(Debug, thiserror::Error)]
pub enum ExpiryError {
    /// The key is not registered: it never existed, has already fired,
    /// or was removed. For a lease this means "the lease no longer
    /// exists", not a transient fault.
    #[error("unknown key: {0}")]
    UnknownKey(String),
}

struct EntryState {
    /// Generation id, checked by the firing claim so a stale timer task
    /// can never touch a re-added entry for the same key.
    id: u64,
    /// Current deadline. Publishing a new value both wakes the timer
    /// task and invalidates an in-flight firing claim.
    deadline: watch::Sender<Instant>,
    /// Handle to the entry's timer task, aborted on remove/shutdown.
    task: JoinHandle<()>,
}

/// Concurrency-safe registry of per-key expiration callbacks.
///
/// All operations may be called concurrently from independent tasks.
/// Operations on distinct keys are fully independent; operations on the
/// same key are linearized by the map's shard locks.
pub struct ExpirationRegistry {
    entries: Arc<DashMap<String, EntryState>>,
    next_id: AtomicU64,
}

impl Default for ExpirationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpirationRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register `callback` to fire once `duration` has elapsed, measured
    /// from this call. Returns immediately; the timing runs on its own
    /// task. Must be called within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if `key` already has a live entry. Double-registering a
    /// lease without removing it first means the caller's bookkeeping
    /// has diverged from the registry's.
    pub fn add(
        &self,
        key: impl Into<String>,
        callback: impl FnOnce() + Send + 'static,
        duration: Duration,
    ) {
        let key = key.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (deadline_tx, deadline_rx) = watch::channel(Instant::now() + duration);

        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => {
                panic!("expiration registry out of sync - key {key:?} is already registered");
            }
            Entry::Vacant(slot) => {
                let task = spawn_timer(Arc::clone(&self.entries), key.clone(), id, deadline_rx, callback);
                slot.insert(EntryState {
                    id,
                    deadline: deadline_tx,
                    task,
                });
            }
        }
        debug!(key = %key, ?duration, "expiration entry added");
    }

    /// Reset the deadline for `key` to `duration` from now, keeping the
    /// same callback. Returns `ExpiryError::UnknownKey` if the key is
    /// absent or its firing has already begun.
    pub fn refresh(&self, key: &str, duration: Duration) -> Result<(), ExpiryError> {
        match self.entries.get(key) {
            Some(entry) => {
                // The read guard is held across the publish, so the
                // firing claim (which needs the shard write lock) either
                // ran before this lookup or sees the new deadline.
                entry.deadline.send_replace(Instant::now() + duration);
                debug!(key = %key, ?duration, "expiration entry refreshed");
                Ok(())
            }
            None => Err(ExpiryError::UnknownKey(key.to_string())),
        }
    }

    /// Cancel the pending firing for `key`, if any. Removing an unknown
    /// or already-fired key is a no-op.
    pub fn remove(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            entry.task.abort();
            debug!(key = %key, "expiration entry removed");
        }
    }

    /// Stop every pending entry. None of them will fire after this
    /// returns, and their timer tasks are torn down. Idempotent.
    pub fn shutdown(&self) {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let count = keys.len();
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                entry.task.abort();
            }
        }
        if count > 0 {
            info!(count, "expiration registry shut down");
        }
    }

    /// Number of live entries. Entries whose firing has begun are no
    /// longer counted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for ExpirationRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_timer(
    entries: Arc<DashMap<String, EntryState>>,
    key: String,
    id: u64,
    mut deadline_rx: watch::Receiver<Instant>,
    callback: impl FnOnce() + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut callback = Some(callback);
        loop {
            let deadline = *deadline_rx.borrow_and_update();
            tokio::select! {
                changed = deadline_rx.changed() => {
                    if changed.is_err() {
                        // Entry dropped by remove/shutdown.
                        return;
                    }
                    // Deadline replaced; re-read it.
                }
                _ = time::sleep_until(deadline) => {
                    // Claim the entry. The predicate runs under the shard
                    // write lock: a refresh publishing a new deadline
                    // either completed before (predicate fails, loop
                    // re-reads) or is ordered after the removal (and
                    // reports unknown key).
                    let claimed = entries
                        .remove_if(&key, |_, e| e.id == id && *e.deadline.borrow() == deadline);
                    if claimed.is_some() {
                        debug!(key = %key, "expiration entry fired");
                        if let Some(cb) = callback.take() {
                            cb();
                        }
                        return;
                    }
                    // Lost the claim: refreshed or removed concurrently.
                }
            }
        }
    })
}
