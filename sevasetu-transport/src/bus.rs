//! Subscriber registries backing the transport's message and diagnostic streams.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

struct Entries<T: ?Sized> {
    next_id: u64,
    items: Vec<(u64, Arc<T>)>,
}

trait Unregister: Send + Sync {
    fn unregister(&self, id: u64);
}

impl<T: ?Sized + Send + Sync> Unregister for Mutex<Entries<T>> {
    fn unregister(&self, id: u64) {
        lock(self).items.retain(|(i, _)| *i != id);
    }
}

fn lock<T: ?Sized>(m: &Mutex<Entries<T>>) -> MutexGuard<'_, Entries<T>> {
    // Callbacks never run while the lock is held, so a poisoned lock still holds
    // a consistent list.
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Ordered set of callbacks; delivery is first-registered-first-delivered.
pub(crate) struct Registry<T: ?Sized> {
    entries: Arc<Mutex<Entries<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> Registry<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                items: Vec::new(),
            })),
        }
    }

    pub(crate) fn register(&self, cb: Arc<T>) -> Subscription {
        let id = {
            let mut guard = lock(&self.entries);
            let id = guard.next_id;
            guard.next_id += 1;
            guard.items.push((id, cb));
            id
        };

        let entries: Weak<dyn Unregister> = Arc::downgrade(&self.entries) as Weak<dyn Unregister>;
        Subscription { id, entries }
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).items.len()
    }

    fn is_registered(&self, id: u64) -> bool {
        lock(&self.entries).items.iter().any(|(i, _)| *i == id)
    }

    /// Calls `deliver` once per subscriber registered at the time of the call.
    ///
    /// A subscriber removed while the dispatch is running (by an earlier
    /// subscriber, or from another thread) is skipped. A panicking subscriber does
    /// not prevent delivery to the ones after it; its panic message is returned.
    pub(crate) fn dispatch(
        &self,
        mut still_live: impl FnMut() -> bool,
        mut deliver: impl FnMut(&T),
    ) -> Vec<String> {
        let snapshot: Vec<(u64, Arc<T>)> = lock(&self.entries)
            .items
            .iter()
            .map(|(id, cb)| (*id, cb.clone()))
            .collect();

        let mut failures = Vec::new();
        for (id, cb) in snapshot {
            if !still_live() || !self.is_registered(id) {
                continue;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| deliver(&*cb))) {
                failures.push(panic_message(panic.as_ref()));
            }
        }
        failures
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "subscriber panicked".to_string()
    }
}

/// Handle returned by every `on_*` registration.
///
/// Removing is idempotent; dropping the handle does not unsubscribe.
pub struct Subscription {
    id: u64,
    entries: Weak<dyn Unregister>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(entries) = self.entries.upgrade() {
            entries.unregister(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
