//! Change Notifier – fan‑out bus for "this key changed".
//!
//! Plain pub/sub: every observer sees every event and filters by key
//! itself. Delivery is synchronous, in registration order, to the
//! observers registered when `publish` is called. Observers may
//! unsubscribe themselves (or anyone else) from inside a callback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use solana_sdk::pubkey::Pubkey;

/// Identity of a changed record. Observers re‑read the cache for the value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: Pubkey,
}

/// Returned by `subscribe`; hand it back to `unsubscribe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

type Observer = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: HashMap<u64, Observer>,
}

#[derive(Default)]
pub struct ChangeNotifier {
    registry: Mutex<Registry>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, on_event: F) -> SubscriptionToken
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.observers.insert(id, Arc::new(on_event));
        SubscriptionToken(id)
    }

    /// Subscribe to changes of a single key.
    pub fn on_change<F>(&self, key: Pubkey, callback: F) -> SubscriptionToken
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if event.key == key {
                callback(event);
            }
        })
    }

    /// Returns `false` if the token was already released.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.lock().observers.remove(&token.0).is_some()
    }

    pub fn publish(&self, key: Pubkey) {
        let event = ChangeEvent { key };

        // Ids are handed out in increasing order, so sorting restores registration order.
        let mut ids: Vec<u64> = self.lock().observers.keys().copied().collect();
        ids.sort_unstable();

        let mut delivered = 0usize;
        for id in ids {
            // Re-check each time: an earlier callback may have unsubscribed this one.
            let observer = self.lock().observers.get(&id).cloned();
            if let Some(observer) = observer {
                observer(&event);
                delivered += 1;
            }
        }
        debug!("[NOTIFY] {} delivered to {} observers", key, delivered);
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
