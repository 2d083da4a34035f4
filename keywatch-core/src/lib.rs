//! # Keywatch Core
//!
//! A typed in-process key-value store where every entry can carry a
//! deadline. When a deadline passes, a background scheduler removes the
//! entry and notifies subscribers.
//!
//! ## Features
//!
//! - Values of any type in one store, checked against the stored type on
//!   retrieval
//! - Per-entry absolute deadlines or relative TTLs; entries without one
//!   never expire
//! - One background scheduler task per store that sleeps until the next
//!   deadline and re-arms whenever an insert or removal moves it
//! - Expiration callbacks delivered exactly once per expired entry, in
//!   deadline order, outside the store lock
//! - Pluggable key hashing strategy via `BuildHasher`
//!
//! ## Example
//!
//! ```rust,no_run
//! use keywatch_core::Store;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store: Store<&'static str> = Store::new();
//!
//!     let watcher = store.subscribe(|key| {
//!         println!("expired: {key}");
//!     });
//!
//!     // Lives until removed.
//!     store.try_add("config", String::from("production"));
//!
//!     // Gone in 30 seconds, with a notification.
//!     store.try_add_for("session", 42_u64, Duration::from_secs(30)).unwrap();
//!
//!     if let Some(session) = store.try_get::<u64>(&"session") {
//!         println!("session: {session}");
//!     }
//!
//!     store.unsubscribe(watcher);
//!     store.shutdown();
//! }
//! ```

mod entry;
mod error;
mod index;
mod scheduler;
mod store;

pub use error::AddError;
pub use store::{Store, SubscriptionId};
