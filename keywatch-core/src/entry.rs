use std::any::Any;
use std::sync::Arc;

use crate::index::ExpiryStamp;

/// A stored value together with its position in the expiration order.
///
/// The payload is type-erased so a single store can hold values of any type.
/// The concrete type is recovered, and checked, on retrieval.
pub(crate) struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Option<ExpiryStamp>,
}

impl Entry {
    /// Creates a new entry. `expires_at` of `None` means the entry never
    /// expires.
    pub(crate) fn new(value: Arc<dyn Any + Send + Sync>, expires_at: Option<ExpiryStamp>) -> Self {
        Self { value, expires_at }
    }

    /// Returns the payload as `Arc<V>` if it was stored as a `V`.
    ///
    /// A mismatched type yields `None`, the same as a missing entry.
    pub(crate) fn value_as<V>(&self) -> Option<Arc<V>>
    where
        V: Send + Sync + 'static,
    {
        Arc::clone(&self.value).downcast::<V>().ok()
    }

    pub(crate) fn expires_at(&self) -> Option<ExpiryStamp> {
        self.expires_at
    }
}
