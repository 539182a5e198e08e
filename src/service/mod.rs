//! The object handed to UI / strategy code.
//!
//! Built once per process from its collaborators and passed around by
//! `Arc`. Sessions come and go with the active wallet; [`shutdown`]
//! ends the session and empties every table.
//!
//! [`shutdown`]: AccountCacheService::shutdown

use std::sync::Arc;

use anyhow::Result;
use log::info;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::watch;

use crate::cache::{FetchError, Fetcher, RecordCache};
use crate::notify::{ChangeEvent, ChangeNotifier, SubscriptionToken};
use crate::rpc::{PushSource, RemoteSource};
use crate::state::{AccountRecord, MintRecord};
use crate::sync::{Reconciler, SessionState, TrackingConfig};

pub struct AccountCacheService {
    cache: Arc<RecordCache>,
    notifier: Arc<ChangeNotifier>,
    reconciler: Reconciler,
}

impl AccountCacheService {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        push: Arc<dyn PushSource>,
        tracking: TrackingConfig,
    ) -> Self {
        let cache = Arc::new(RecordCache::new(Fetcher::new(remote)));
        let notifier = Arc::new(ChangeNotifier::new());
        let reconciler = Reconciler::new(Arc::clone(&cache), Arc::clone(&notifier), push, tracking);
        Self {
            cache,
            notifier,
            reconciler,
        }
    }

    pub fn cache(&self) -> &Arc<RecordCache> {
        &self.cache
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub async fn get_account(&self, key: Pubkey) -> Result<AccountRecord, FetchError> {
        self.cache.get_account(key).await
    }

    pub async fn get_mint(&self, key: Pubkey) -> Result<MintRecord, FetchError> {
        self.cache.get_mint(key).await
    }

    /// Token accounts of the active principal plus its native balance, if any.
    pub fn get_owned_records(&self) -> Vec<AccountRecord> {
        self.reconciler.owned_records()
    }

    /// The owned account holding `mint`. Real token accounts win over the
    /// native pseudo‑record, which is keyed by the principal itself.
    pub fn owned_account_by_mint(&self, mint: &Pubkey) -> Option<AccountRecord> {
        let principal = self.reconciler.principal();
        let mut matching: Vec<AccountRecord> = self
            .get_owned_records()
            .into_iter()
            .filter(|record| record.mint == *mint)
            .collect();
        matching.sort_by_key(|record| Some(record.key) == principal);
        matching.into_iter().next()
    }

    pub fn watch_owned(&self) -> watch::Receiver<Arc<Vec<AccountRecord>>> {
        self.reconciler.watch_owned()
    }

    pub fn session_state(&self) -> SessionState {
        self.reconciler.state()
    }

    pub fn on_change<F>(&self, key: Pubkey, callback: F) -> SubscriptionToken
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.notifier.on_change(key, callback)
    }

    pub fn off_change(&self, token: SubscriptionToken) -> bool {
        self.notifier.unsubscribe(token)
    }

    pub async fn start_session(&self, principal: Pubkey) -> Result<()> {
        self.reconciler.start_session(principal).await
    }

    pub async fn end_session(&self) {
        self.reconciler.end_session().await
    }

    pub async fn shutdown(&self) {
        self.reconciler.end_session().await;
        self.cache.clear();
        info!("🧹 [SERVICE] Cache cleared");
    }
}
