//! Keyed record container plus its in‑flight fetch table.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::watch;

use crate::cache::FetchError;

/// A fetch that every concurrent caller for the same key awaits.
pub type PendingFetch<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

/// Last‑write‑wins map of decoded records with no expiry.
///
/// The in‑flight table is guarded by one mutex for the whole container.
/// The dedup cache holds that lock across its check‑then‑install and
/// its remove‑then‑store steps so no caller can miss both tables at once.
pub struct RecordStore<T> {
    records: DashMap<Pubkey, T>,
    in_flight: Mutex<HashMap<Pubkey, PendingFetch<T>>>,
    writes: watch::Sender<u64>,
}

impl<T: Clone> RecordStore<T> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            in_flight: Mutex::new(HashMap::new()),
            writes: watch::channel(0).0,
        }
    }

    pub fn get(&self, key: &Pubkey) -> Option<T> {
        self.records.get(key).map(|entry| entry.value().clone())
    }

    pub fn put(&self, key: Pubkey, record: T) {
        self.records.insert(key, record);
        self.writes.send_modify(|revision| *revision += 1);
    }

    pub fn has(&self, key: &Pubkey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Point‑in‑time copy of every record matching `predicate`.
    pub fn filter<F>(&self, mut predicate: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock_in_flight().len()
    }

    pub fn is_in_flight(&self, key: &Pubkey) -> bool {
        self.lock_in_flight().contains_key(key)
    }

    /// Drop every record and forget every pending fetch.
    pub fn clear(&self) {
        let mut in_flight = self.lock_in_flight();
        in_flight.clear();
        self.records.clear();
        self.writes.send_modify(|revision| *revision += 1);
    }

    /// Ticks after every `put` and `clear`. Bursts of writes may coalesce.
    pub fn watch_writes(&self) -> watch::Receiver<u64> {
        self.writes.subscribe()
    }

    pub(crate) fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<Pubkey, PendingFetch<T>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for RecordStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
