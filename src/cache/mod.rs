//! Single‑flight record cache.
//!
//! Lookup order for a key:
//! 1. cached record → returned without touching the network
//! 2. fetch already in flight → the caller awaits that same fetch
//! 3. otherwise a fetch is spawned and installed in the in‑flight table
//!
//! Steps 1–3 run under the container's in‑flight lock, and so does the
//! settle step (drop the in‑flight entry, then store the record). A second
//! caller therefore always sees either the record or the pending fetch.
//! Failures are never cached: the entry is dropped and the next call retries.

pub mod error;
pub mod fetcher;

use std::collections::HashSet;
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, info};
use solana_sdk::pubkey::Pubkey;

pub use error::FetchError;
pub use fetcher::Fetcher;

use crate::state::{
    decode, store::PendingFetch, AccountRecord, CachedRecord, DecodeError, MintRecord,
    RecordStore,
};

/// Upper bound on keys per batched read. The RPC node rejects more than 100.
pub const MAX_KEYS_PER_READ: usize = 99;

pub struct RecordCache {
    accounts: Arc<RecordStore<AccountRecord>>,
    mints: Arc<RecordStore<MintRecord>>,
    fetcher: Fetcher,
}

impl RecordCache {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            accounts: Arc::new(RecordStore::new()),
            mints: Arc::new(RecordStore::new()),
            fetcher,
        }
    }

    pub fn accounts(&self) -> &Arc<RecordStore<AccountRecord>> {
        &self.accounts
    }

    pub fn mints(&self) -> &Arc<RecordStore<MintRecord>> {
        &self.mints
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub async fn get_account(&self, key: Pubkey) -> Result<AccountRecord, FetchError> {
        self.get_or_fetch(&self.accounts, key).await
    }

    pub async fn get_mint(&self, key: Pubkey) -> Result<MintRecord, FetchError> {
        self.get_or_fetch(&self.mints, key).await
    }

    /// Cached account without fetching.
    pub fn cached_account(&self, key: &Pubkey) -> Option<AccountRecord> {
        self.accounts.get(key)
    }

    /// Cached mint without fetching.
    pub fn cached_mint(&self, key: &Pubkey) -> Option<MintRecord> {
        self.mints.get(key)
    }

    pub fn find_accounts<F>(&self, predicate: F) -> Vec<AccountRecord>
    where
        F: FnMut(&AccountRecord) -> bool,
    {
        self.accounts.filter(predicate)
    }

    /// Warm the account container with batched reads. Returns how many records were stored.
    pub async fn prefetch_accounts(&self, keys: &[Pubkey]) -> Result<usize, FetchError> {
        self.prefetch(&self.accounts, keys).await
    }

    /// Warm the mint container with batched reads. Returns how many records were stored.
    pub async fn prefetch_mints(&self, keys: &[Pubkey]) -> Result<usize, FetchError> {
        self.prefetch(&self.mints, keys).await
    }

    /// Drop all records and pending fetches. Fetches already running still
    /// complete and land in the fresh containers.
    pub fn clear(&self) {
        self.accounts.clear();
        self.mints.clear();
    }

    async fn get_or_fetch<T: CachedRecord>(
        &self,
        store: &Arc<RecordStore<T>>,
        key: Pubkey,
    ) -> Result<T, FetchError> {
        let pending = {
            let mut in_flight = store.lock_in_flight();
            if let Some(record) = store.get(&key) {
                return Ok(record);
            }
            match in_flight.get(&key) {
                Some(pending) => {
                    debug!("[CACHE] Joining in-flight {} fetch for {}", T::KIND, key);
                    pending.clone()
                }
                None => {
                    let pending = self.spawn_fetch(Arc::clone(store), key);
                    in_flight.insert(key, pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Must be called with the in‑flight lock held; the spawned task takes
    /// the same lock to settle, so it cannot finish before installation.
    fn spawn_fetch<T: CachedRecord>(
        &self,
        store: Arc<RecordStore<T>>,
        key: Pubkey,
    ) -> PendingFetch<T> {
        let fetcher = self.fetcher.clone();
        debug!("🔍 [CACHE] Fetching {} {}", T::KIND, key);

        let task = tokio::spawn(async move {
            let result = fetcher
                .fetch(key, T::KIND)
                .await
                .and_then(|record| {
                    let kind = record.kind();
                    T::from_record(record).ok_or_else(|| {
                        FetchError::Decode(DecodeError {
                            key,
                            kind: T::KIND,
                            len: 0,
                            reason: format!("decoded as {kind}"),
                        })
                    })
                });

            let mut in_flight = store.lock_in_flight();
            in_flight.remove(&key);
            match &result {
                Ok(record) => store.put(key, record.clone()),
                Err(e) => debug!("[CACHE] {} fetch for {} failed: {}", T::KIND, key, e),
            }
            drop(in_flight);
            result
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(FetchError::Transport(format!("fetch task aborted: {e}"))))
        }
        .boxed()
        .shared()
    }

    async fn prefetch<T: CachedRecord>(
        &self,
        store: &RecordStore<T>,
        keys: &[Pubkey],
    ) -> Result<usize, FetchError> {
        let missing: Vec<Pubkey> = {
            let in_flight = store.lock_in_flight();
            let mut seen = HashSet::new();
            keys.iter()
                .filter(|key| !store.has(key) && !in_flight.contains_key(*key))
                .filter(|key| seen.insert(**key))
                .copied()
                .collect()
        };
        if missing.is_empty() {
            return Ok(0);
        }

        let remote = self.fetcher.remote();
        let mut stored = 0;
        for chunk in missing.chunks(MAX_KEYS_PER_READ) {
            let results = remote
                .read_multiple(chunk)
                .await
                .map_err(FetchError::transport)?;
            for (key, data) in chunk.iter().zip(results) {
                let Some(data) = data else {
                    continue;
                };
                match decode(*key, &data, T::KIND) {
                    Ok(record) => {
                        if let Some(record) = T::from_record(record) {
                            store.put(*key, record);
                            stored += 1;
                        }
                    }
                    Err(e) => debug!("[CACHE] Prefetch skipped: {}", e),
                }
            }
        }

        info!(
            "💾 [CACHE] Prefetched {}/{} {} records",
            stored,
            missing.len(),
            T::KIND
        );
        Ok(stored)
    }
}
