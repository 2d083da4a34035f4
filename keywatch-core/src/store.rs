use std::any::Any;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::entry::Entry;
use crate::error::AddError;
use crate::index::{ExpirationIndex, ExpiryStamp};
use crate::scheduler;

/// Handle returned by [`Store::subscribe`], used to unregister the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback invoked with the key of each expired entry.
pub(crate) type ExpirationCallback<K> = Arc<dyn Fn(&K) + Send + Sync>;

/// Everything guarded by the store lock.
///
/// A key has a slot in `expirations` exactly when its entry carries a
/// deadline, and the two stamps are always identical. Every operation that
/// touches one map touches the other under the same lock to keep that true.
pub(crate) struct State<K, S> {
    entries: HashMap<K, Entry, S>,
    expirations: ExpirationIndex<K>,
    subscribers: Vec<(SubscriptionId, ExpirationCallback<K>)>,
    next_seq: u64,
    next_subscription: u64,
}

impl<K, S> State<K, S> {
    fn next_stamp(&mut self, deadline: Instant) -> ExpiryStamp {
        let seq = self.next_seq;
        self.next_seq += 1;
        ExpiryStamp { deadline, seq }
    }
}

/// Internal shared state for the store.
pub(crate) struct StoreInner<K, S> {
    state: Mutex<State<K, S>>,
    /// Sender to wake the scheduler when the earliest deadline changes.
    rearm_tx: watch::Sender<()>,
    /// Sender to signal shutdown to the scheduler task.
    shutdown_tx: watch::Sender<bool>,
}

impl<K, S> StoreInner<K, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Deadline of the next entry to expire, if any.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.state
            .lock()
            .expirations
            .peek_first()
            .map(|stamp| stamp.deadline)
    }

    /// Removes every entry whose deadline has passed.
    ///
    /// Returns the expired keys in firing order together with a snapshot of
    /// the subscriber list, so callbacks can be invoked after the lock is
    /// released.
    pub(crate) fn take_due(
        &self,
        now: Instant,
    ) -> (Vec<K>, Vec<(SubscriptionId, ExpirationCallback<K>)>) {
        let mut state = self.state.lock();
        let mut due = Vec::new();
        while let Some((_, key)) = state.expirations.pop_due(now) {
            state.entries.remove(&key);
            due.push(key);
        }
        let subscribers = if due.is_empty() {
            Vec::new()
        } else {
            state.subscribers.clone()
        };
        (due, subscribers)
    }
}

impl<K, S> Drop for StoreInner<K, S> {
    fn drop(&mut self) {
        // Stop the scheduler when the last store handle is dropped.
        let _ = self.shutdown_tx.send(true);
    }
}

/// Typed in-memory key-value store with per-entry expiration.
///
/// Values of any type can live in the same store; retrieval checks the
/// requested type against the stored one. Entries added with a deadline are
/// removed by a background scheduler task when the deadline passes, and
/// every subscriber registered at that moment is notified exactly once.
///
/// All operations go through a single mutex, so a lookup observes either
/// the state before or after any concurrent insert, never a partial one.
/// Cloning the store is cheap and yields another handle to the same data.
///
/// # Example
///
/// ```rust,no_run
/// use keywatch_core::Store;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let store: Store<String> = Store::new();
///
///     store.subscribe(|key| println!("gone: {key}"));
///
///     store.try_add_for("greeting".to_string(), "hello", Duration::from_secs(5)).unwrap();
///     assert_eq!(
///         store.try_get::<&str>(&"greeting".to_string()).as_deref(),
///         Some(&"hello"),
///     );
/// }
/// ```
pub struct Store<K, S = RandomState> {
    inner: Arc<StoreInner<K, S>>,
}

impl<K, S> Clone for Store<K, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Store<K, RandomState>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates a new store with the default key hashing strategy.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context. The store
    /// requires a runtime to spawn its background scheduler task.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K> Default for Store<K, RandomState>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S> Store<K, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    S: BuildHasher + Send + 'static,
{
    /// Creates a new store with a custom key hashing strategy.
    ///
    /// This is the hook for callers that need their own notion of key
    /// equality, such as case-insensitive strings or identity hashing.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context. The store
    /// requires a runtime to spawn its background scheduler task.
    pub fn with_hasher(hasher: S) -> Self {
        // Verify that a Tokio runtime is available before proceeding.
        // This provides a clear error message instead of a cryptic panic
        // from tokio::spawn.
        if tokio::runtime::Handle::try_current().is_err() {
            panic!(
                "keywatch_core::Store requires a Tokio runtime. \
                 Ensure you are calling Store::new() or Store::with_hasher() \
                 from within a #[tokio::main] or #[tokio::test] context, \
                 or from code running on a Tokio runtime."
            );
        }

        let (rearm_tx, rearm_rx) = watch::channel(());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(StoreInner {
            state: Mutex::new(State {
                entries: HashMap::with_hasher(hasher),
                expirations: ExpirationIndex::new(),
                subscribers: Vec::new(),
                next_seq: 0,
                next_subscription: 0,
            }),
            rearm_tx,
            shutdown_tx,
        });

        // The scheduler holds only a weak reference so that dropping the
        // last store handle tears the task down instead of leaking it.
        tokio::spawn(scheduler::run(
            Arc::downgrade(&inner),
            rearm_rx,
            shutdown_rx,
        ));

        Self { inner }
    }

    /// Inserts a value with no expiration.
    ///
    /// Inserts never replace: if the key is already present the call returns
    /// `false` and the existing entry is left untouched.
    pub fn try_add<V>(&self, key: K, value: V) -> bool
    where
        V: Send + Sync + 'static,
    {
        self.add_entry(key, Arc::new(value), None)
    }

    /// Inserts a value that expires `ttl` from now.
    ///
    /// Behaves like [`Store::try_add`] for keys that already exist.
    ///
    /// # Errors
    ///
    /// Returns [`AddError::DeadlineNotInFuture`] for a zero `ttl`. Nothing
    /// is inserted in that case.
    pub fn try_add_for<V>(&self, key: K, value: V, ttl: Duration) -> Result<bool, AddError>
    where
        V: Send + Sync + 'static,
    {
        self.try_add_until(key, value, Instant::now() + ttl)
    }

    /// Inserts a value that expires at the given instant.
    ///
    /// If the new deadline is the earliest one pending, the scheduler wait
    /// is replaced to target it. Behaves like [`Store::try_add`] for keys
    /// that already exist.
    ///
    /// # Errors
    ///
    /// Returns [`AddError::DeadlineNotInFuture`] if `deadline` is not
    /// strictly later than the current time. Nothing is inserted in that
    /// case.
    pub fn try_add_until<V>(&self, key: K, value: V, deadline: Instant) -> Result<bool, AddError>
    where
        V: Send + Sync + 'static,
    {
        if deadline <= Instant::now() {
            return Err(AddError::DeadlineNotInFuture);
        }
        Ok(self.add_entry(key, Arc::new(value), Some(deadline)))
    }

    fn add_entry(
        &self,
        key: K,
        value: Arc<dyn Any + Send + Sync>,
        deadline: Option<Instant>,
    ) -> bool {
        let mut state = self.inner.state.lock();
        if state.entries.contains_key(&key) {
            return false;
        }

        let stamp = deadline.map(|deadline| state.next_stamp(deadline));
        if let Some(stamp) = stamp {
            state.expirations.insert(stamp, key.clone());
        }
        state.entries.insert(key, Entry::new(value, stamp));

        if let Some(stamp) = stamp {
            // Wake the scheduler only when this deadline became the next one
            // to fire; anything later leaves the current wait target valid.
            if state.expirations.peek_first() == Some(stamp) {
                let _ = self.inner.rearm_tx.send(());
            }
        }
        true
    }

    /// Retrieves the value stored under `key` as a `V`.
    ///
    /// Returns `None` if the key is absent or if the entry was stored as a
    /// different type; a type mismatch is a caller contract violation and is
    /// reported the same way as a miss rather than panicking.
    ///
    /// Reads never evict. An entry whose deadline has passed but whose
    /// notification has not fired yet is still returned; expiration is
    /// exclusively the scheduler's job.
    pub fn try_get<V>(&self, key: &K) -> Option<Arc<V>>
    where
        V: Send + Sync + 'static,
    {
        let state = self.inner.state.lock();
        state.entries.get(key)?.value_as::<V>()
    }

    /// Removes the entry stored under `key`.
    ///
    /// Returns `true` if an entry was removed. Explicit removal never
    /// notifies subscribers; if the removed deadline was the one being
    /// waited on, the scheduler re-arms for the new earliest deadline.
    #[must_use = "returns whether the key existed"]
    pub fn try_remove(&self, key: &K) -> bool {
        let mut state = self.inner.state.lock();
        if let Some(entry) = state.entries.remove(key) {
            if let Some(stamp) = entry.expires_at() {
                let was_next = state.expirations.peek_first() == Some(stamp);
                state.expirations.remove(&stamp);
                if was_next {
                    let _ = self.inner.rearm_tx.send(());
                }
            }
            true
        } else {
            false
        }
    }

    /// Checks if a key is present, regardless of the stored value's type.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    /// Returns the number of entries in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Returns `true` if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().entries.is_empty()
    }

    /// Removes every entry and returns how many were removed.
    ///
    /// Pending deadlines are discarded and the scheduler goes idle; no
    /// notifications fire for cleared entries.
    pub fn clear(&self) -> usize {
        let mut state = self.inner.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        if !state.expirations.is_empty() {
            state.expirations.clear();
            let _ = self.inner.rearm_tx.send(());
        }
        count
    }

    /// Registers a callback invoked with the key of every expired entry.
    ///
    /// Each registered callback runs exactly once per expiration, in
    /// registration order, outside the store lock. A callback is free to
    /// call back into the store. Panics inside a callback are caught and
    /// logged without affecting other subscribers or future expirations.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        state.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Removes a previously registered callback.
    ///
    /// Returns `true` if the subscription existed. A fan-out already in
    /// flight still delivers to the snapshot it was taken with.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sub_id, _)| *sub_id != id);
        state.subscribers.len() != before
    }

    /// Stops the background scheduler.
    ///
    /// No further expiration notifications fire after this returns; a
    /// fan-out already in flight is allowed to complete. This is also done
    /// automatically when the last store handle is dropped.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }
}
