//! Per-collection intent locks.
//!
//! Record writes and bulk operations hold a shared intent on their slug;
//! migrations and collection deletes hold an exclusive one. Acquisition never
//! waits: a contended slug is reported to the caller immediately.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Held {
    Shared(usize),
    Exclusive,
}

/// Which kind of intent a caller holds or wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Shared,
    Exclusive,
}

/// Non-blocking shared/exclusive locks keyed by collection slug.
#[derive(Debug, Clone, Default)]
pub struct IntentLocks {
    held: Arc<DashMap<String, Held>>,
}

impl IntentLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a shared intent, unless an exclusive one is held.
    #[must_use]
    pub fn try_shared(&self, slug: &str) -> Option<IntentGuard> {
        match self.held.entry(slug.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(Held::Shared(1));
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                Held::Shared(n) => *n += 1,
                Held::Exclusive => return None,
            },
        }
        Some(self.guard(slug, IntentKind::Shared))
    }

    /// Takes an exclusive intent, unless any intent is held.
    #[must_use]
    pub fn try_exclusive(&self, slug: &str) -> Option<IntentGuard> {
        match self.held.entry(slug.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(Held::Exclusive);
            }
            Entry::Occupied(_) => return None,
        }
        Some(self.guard(slug, IntentKind::Exclusive))
    }

    /// Kind of intent currently held on `slug`, if any.
    #[must_use]
    pub fn held(&self, slug: &str) -> Option<IntentKind> {
        self.held.get(slug).map(|h| match *h {
            Held::Shared(_) => IntentKind::Shared,
            Held::Exclusive => IntentKind::Exclusive,
        })
    }

    fn guard(&self, slug: &str, kind: IntentKind) -> IntentGuard {
        IntentGuard {
            held: Arc::clone(&self.held),
            slug: slug.to_string(),
            kind,
        }
    }
}

/// Releases its intent on drop.
#[derive(Debug)]
pub struct IntentGuard {
    held: Arc<DashMap<String, Held>>,
    slug: String,
    kind: IntentKind,
}

impl IntentGuard {
    #[must_use]
    pub fn kind(&self) -> IntentKind {
        self.kind
    }
}

impl Drop for IntentGuard {
    fn drop(&mut self) {
        let Entry::Occupied(mut slot) = self.held.entry(self.slug.clone()) else {
            return;
        };
        match slot.get_mut() {
            Held::Shared(n) if *n > 1 => *n -= 1,
            _ => {
                slot.remove();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_intents_stack() {
        let locks = IntentLocks::new();
        let a = locks.try_shared("orders").unwrap();
        let b = locks.try_shared("orders").unwrap();
        assert!(locks.try_exclusive("orders").is_none());
        drop(a);
        assert!(locks.try_exclusive("orders").is_none());
        drop(b);
        assert!(locks.held("orders").is_none());
        assert!(locks.try_exclusive("orders").is_some());
    }

    #[test]
    fn exclusive_blocks_everything() {
        let locks = IntentLocks::new();
        let guard = locks.try_exclusive("orders").unwrap();
        assert_eq!(guard.kind(), IntentKind::Exclusive);
        assert!(locks.try_shared("orders").is_none());
        assert!(locks.try_exclusive("orders").is_none());
        drop(guard);
        assert!(locks.try_shared("orders").is_some());
    }

    #[test]
    fn slugs_are_independent() {
        let locks = IntentLocks::new();
        let _orders = locks.try_exclusive("orders").unwrap();
        assert!(locks.try_exclusive("users").is_some());
    }
}
