use std::hash::{BuildHasher, Hash};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Weak;

use tokio::sync::watch;
use tokio::time::{self, Instant};

use crate::store::StoreInner;

/// Background loop driving expirations for one store.
///
/// This task is the only logical waiter. On every iteration it recomputes
/// the earliest pending deadline under the store lock, sleeps until that
/// deadline, and is woken early through the rearm channel whenever a
/// mutation changes the minimum. Waking drops the in-flight sleep, which is
/// what cancels a superseded wait: two waits can never both reach firing.
///
/// The task holds only a weak reference to the store so that dropping the
/// last store handle tears the loop down instead of keeping it alive.
pub(crate) async fn run<K, S>(
    inner: Weak<StoreInner<K, S>>,
    mut rearm_rx: watch::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    K: Eq + Hash + Send + 'static,
    S: BuildHasher + Send + 'static,
{
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let next_deadline = match inner.upgrade() {
            Some(store) => store.next_deadline(),
            None => break,
        };

        match next_deadline {
            Some(deadline) => {
                tracing::trace!("scheduler armed");
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {}
                    result = rearm_rx.changed() => {
                        // A mutation changed the earliest deadline; loop
                        // around and recompute the wait target.
                        if result.is_err() {
                            break;
                        }
                    }
                    _ = time::sleep_until(deadline) => {
                        match inner.upgrade() {
                            Some(store) => fire_due(&store),
                            None => break,
                        }
                    }
                }
            }
            None => {
                tracing::trace!("scheduler idle");
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {}
                    result = rearm_rx.changed() => {
                        if result.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    tracing::debug!("expiration scheduler stopped");
}

/// Removes everything that is due and fans the expirations out.
///
/// Entries are removed and the subscriber list snapshotted under the lock;
/// the callbacks run after it is released, so a subscriber may call back
/// into the store without deadlocking. If the awaited entry was removed or
/// preempted before the sleep elapsed, nothing is due and the caller simply
/// re-arms for whatever is pending now.
fn fire_due<K, S>(inner: &StoreInner<K, S>)
where
    K: Eq + Hash,
    S: BuildHasher,
{
    let (expired, subscribers) = inner.take_due(Instant::now());
    if expired.is_empty() {
        return;
    }
    tracing::debug!(count = expired.len(), "entries expired");

    for key in &expired {
        for (_, callback) in &subscribers {
            // A panicking subscriber must not take down the scheduler or
            // starve the remaining subscribers.
            if panic::catch_unwind(AssertUnwindSafe(|| callback(key))).is_err() {
                tracing::error!("expiration subscriber panicked");
            }
        }
    }
}
