//! Push Listener / Reconciler.
//!
//! Per principal session:
//!
//! ```text
//! Unsubscribed ──start──▶ bulk load ──▶ Subscribing ──handles acquired──▶ Active
//!      ▲                                     │                              │
//!      └───────────── subscribe failed ──────┘◀──── end / stream closed ────┘
//! ```
//!
//! While Active, every program notification passes a cheap relevance
//! filter (exact token account size, and either a tracked owner or an
//! already cached key), is decoded, stored, and announced on the
//! [`ChangeNotifier`]. Bad payloads are dropped without touching the stream.
//!
//! When the server closes either stream the whole session is torn down:
//! the sibling stream is released, the view is emptied, and the state
//! drops to `Unsubscribed` for the owner to act on.
//!
//! The size check is a heuristic inherited from how the program stream is
//! consumed: it treats "165 bytes" as "is a token account". Anything else the
//! program owns with that size would pass it; decode catches most of those.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use dashmap::DashSet;
use futures::{future::join_all, stream::BoxStream, StreamExt};
use log::{debug, error, info, warn};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::loader::BulkLoader;
use crate::cache::RecordCache;
use crate::notify::ChangeNotifier;
use crate::rpc::{PushEvent, PushFilter, PushSource, RemoteSource, SubscriptionHandle};
use crate::state::{
    decode::{decode, TOKEN_ACCOUNT_LEN},
    AccountRecord, Record, RecordKind,
};

/// Which principals are always worth following and where token accounts live.
#[derive(Clone, Debug)]
pub struct TrackingConfig {
    pub token_program_id: Pubkey,
    /// Infrastructure principals (e.g. the fee collector) tracked in every session.
    pub always_track: Vec<Pubkey>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            token_program_id: spl_token::id(),
            always_track: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unsubscribed,
    Subscribing,
    Active,
}

/// What happened to one inbound push event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    /// Payload is not token‑account sized.
    WrongSize,
    /// Neither a tracked owner nor a cached key.
    Untracked,
    /// Passed the filter but failed to decode.
    Undecodable,
    /// Native balance for a principal that is no longer active.
    Stale,
}

#[derive(Default)]
struct View {
    principal: Option<Pubkey>,
    native_lamports: Option<u64>,
}

struct ActiveSession {
    id: u64,
    principal: Pubkey,
    handles: Vec<SubscriptionHandle>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    cache: Arc<RecordCache>,
    notifier: Arc<ChangeNotifier>,
    push: Arc<dyn PushSource>,
    tracking: TrackingConfig,
    tracked_owners: DashSet<Pubkey>,
    view: RwLock<View>,
    state_tx: watch::Sender<SessionState>,
    owned_tx: watch::Sender<Arc<Vec<AccountRecord>>>,
    session: Mutex<Option<ActiveSession>>,
    next_session: AtomicU64,
}

impl Inner {
    fn view(&self) -> RwLockReadGuard<'_, View> {
        self.view.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn view_mut(&self) -> RwLockWriteGuard<'_, View> {
        self.view.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    fn owned_records(&self) -> Vec<AccountRecord> {
        let (principal, native) = {
            let view = self.view();
            (view.principal, view.native_lamports)
        };
        let Some(principal) = principal else {
            return Vec::new();
        };

        let mut owned = self.cache.accounts().filter(|a| a.owner == principal);
        owned.sort_by_key(|a| a.key);
        if let Some(lamports) = native {
            owned.push(AccountRecord::wrapped_native(principal, lamports));
        }
        owned
    }

    /// Receivers only wake when the owned set actually differs.
    fn republish_owned(&self) {
        let owned = self.owned_records();
        self.owned_tx.send_if_modified(|current| {
            if **current == owned {
                return false;
            }
            *current = Arc::new(owned);
            true
        });
    }

    fn reset(&self) {
        {
            let mut view = self.view_mut();
            view.principal = None;
            view.native_lamports = None;
        }
        self.tracked_owners.clear();
        for owner in &self.tracking.always_track {
            self.tracked_owners.insert(*owner);
        }
        self.set_state(SessionState::Unsubscribed);
        self.republish_owned();
    }

    fn apply_token_event(&self, event: PushEvent) -> EventOutcome {
        if event.data.len() != TOKEN_ACCOUNT_LEN {
            return EventOutcome::WrongSize;
        }
        let tracked_owner = event
            .owner
            .map_or(false, |owner| self.tracked_owners.contains(&owner));
        if !tracked_owner && !self.cache.accounts().has(&event.key) {
            return EventOutcome::Untracked;
        }

        let account = match decode(event.key, &event.data, RecordKind::Account) {
            Ok(Record::Account(account)) => account,
            Ok(_) => return EventOutcome::Undecodable,
            Err(e) => {
                debug!("[PUSH] Dropping event: {}", e);
                return EventOutcome::Undecodable;
            }
        };

        debug!("📥 [PUSH] {} balance {}", event.key, account.balance);
        self.cache.accounts().put(event.key, account);
        self.republish_owned();
        self.notifier.publish(event.key);
        EventOutcome::Applied
    }

    fn apply_native_event(&self, principal: Pubkey, event: PushEvent) -> EventOutcome {
        {
            let mut view = self.view_mut();
            if view.principal != Some(principal) {
                return EventOutcome::Stale;
            }
            view.native_lamports = Some(event.lamports);
        }
        debug!("📥 [PUSH] Native balance of {} is {}", principal, event.lamports);
        self.republish_owned();
        self.notifier.publish(principal);
        EventOutcome::Applied
    }

    async fn teardown(&self, session: ActiveSession) {
        for task in &session.tasks {
            task.abort();
        }
        for handle in session.handles {
            if let Err(e) = self.push.unsubscribe(handle).await {
                warn!("⚠️ [SESSION] Unsubscribe {:?} failed: {:#}", handle, e);
            }
        }
        self.reset();
        info!("👋 [SESSION] Stopped tracking {}", session.principal);
    }

    /// Tear down session `id` if it is still the running one.
    async fn close_session(&self, id: u64) {
        let mut session = self.session.lock().await;
        match session.take() {
            Some(active) if active.id == id => self.teardown(active).await,
            other => *session = other,
        }
    }
}

pub struct Reconciler {
    inner: Arc<Inner>,
    remote: Arc<dyn RemoteSource>,
    loader: BulkLoader,
}

impl Reconciler {
    pub fn new(
        cache: Arc<RecordCache>,
        notifier: Arc<ChangeNotifier>,
        push: Arc<dyn PushSource>,
        tracking: TrackingConfig,
    ) -> Self {
        let remote = Arc::clone(cache.fetcher().remote());
        let loader = BulkLoader::new(Arc::clone(&remote), Arc::clone(cache.accounts()));
        let tracked_owners = DashSet::new();
        for owner in &tracking.always_track {
            tracked_owners.insert(*owner);
        }
        let (state_tx, _) = watch::channel(SessionState::Unsubscribed);
        let (owned_tx, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            inner: Arc::new(Inner {
                cache,
                notifier,
                push,
                tracking,
                tracked_owners,
                view: RwLock::new(View::default()),
                state_tx,
                owned_tx,
                session: Mutex::new(None),
                next_session: AtomicU64::new(0),
            }),
            remote,
            loader,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Observe state changes, including a server closing the stream.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn principal(&self) -> Option<Pubkey> {
        self.inner.view().principal
    }

    pub fn owned_records(&self) -> Vec<AccountRecord> {
        self.inner.owned_records()
    }

    /// Follows bulk loads, push events, and any other write to the account
    /// container (single fetches and prefetches included) while a session runs.
    pub fn watch_owned(&self) -> watch::Receiver<Arc<Vec<AccountRecord>>> {
        self.inner.owned_tx.subscribe()
    }

    pub fn loader(&self) -> &BulkLoader {
        &self.loader
    }

    /// Run one program notification through the filter and apply it.
    pub fn handle_push_event(&self, event: PushEvent) -> EventOutcome {
        self.inner.apply_token_event(event)
    }

    /// Seed, subscribe, and start consuming updates for `principal`.
    ///
    /// Any running session is torn down first. Subscription failures are
    /// returned so the owner can decide whether to retry.
    pub async fn start_session(&self, principal: Pubkey) -> Result<()> {
        let inner = &self.inner;
        let mut session = inner.session.lock().await;
        if let Some(previous) = session.take() {
            info!(
                "🔄 [SESSION] Principal change {} -> {}",
                previous.principal, principal
            );
            inner.teardown(previous).await;
        }

        inner.view_mut().principal = Some(principal);

        let mut owners = vec![principal];
        owners.extend(
            inner
                .tracking
                .always_track
                .iter()
                .filter(|owner| **owner != principal)
                .copied(),
        );
        let loads = join_all(owners.iter().map(|owner| self.loader.load_owned(*owner))).await;
        for (owner, result) in owners.iter().zip(loads) {
            match result {
                Ok(_) => {
                    inner.tracked_owners.insert(*owner);
                }
                Err(e) if *owner == principal => {
                    inner.reset();
                    return Err(e);
                }
                Err(e) => warn!("⚠️ [SESSION] Bulk load for {} failed: {:#}", owner, e),
            }
        }

        match self.remote.native_balance(&principal).await {
            Ok(lamports) => inner.view_mut().native_lamports = lamports,
            Err(e) => warn!("⚠️ [SESSION] Native balance of {} unavailable: {:#}", principal, e),
        }
        inner.republish_owned();

        inner.set_state(SessionState::Subscribing);
        let program = match inner
            .push
            .subscribe(PushFilter::Program {
                program_id: inner.tracking.token_program_id,
                data_size: TOKEN_ACCOUNT_LEN as u64,
            })
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                inner.reset();
                return Err(e.context("subscribing to token program updates"));
            }
        };
        let native = match inner.push.subscribe(PushFilter::Account(principal)).await {
            Ok(subscription) => subscription,
            Err(e) => {
                if let Err(unsub) = inner.push.unsubscribe(program.handle).await {
                    warn!("⚠️ [SESSION] Releasing program subscription: {:#}", unsub);
                }
                inner.reset();
                return Err(e.context(format!("subscribing to native balance of {principal}")));
            }
        };

        let id = inner.next_session.fetch_add(1, Ordering::Relaxed);
        let writes = inner.cache.accounts().watch_writes();
        let tasks = vec![
            tokio::spawn(consume_token_events(Arc::clone(inner), id, program.events)),
            tokio::spawn(consume_native_events(
                Arc::clone(inner),
                id,
                principal,
                native.events,
            )),
            tokio::spawn(follow_account_writes(Arc::clone(inner), writes)),
        ];
        *session = Some(ActiveSession {
            id,
            principal,
            handles: vec![program.handle, native.handle],
            tasks,
        });
        inner.set_state(SessionState::Active);
        info!("✅ [SESSION] Tracking {}", principal);
        Ok(())
    }

    /// Stop consuming updates. Cached records stay where they are.
    pub async fn end_session(&self) {
        let mut session = self.inner.session.lock().await;
        match session.take() {
            Some(active) => self.inner.teardown(active).await,
            None => self.inner.reset(),
        }
    }
}

async fn consume_token_events(
    inner: Arc<Inner>,
    session: u64,
    mut events: BoxStream<'static, PushEvent>,
) {
    while let Some(event) = events.next().await {
        let key = event.key;
        let outcome = inner.apply_token_event(event);
        if outcome != EventOutcome::Applied && outcome != EventOutcome::Untracked {
            debug!("[PUSH] {} -> {:?}", key, outcome);
        }
    }
    error!("❌ [PUSH] Token program stream ended");
    // Teardown aborts this task's siblings, so it runs detached.
    tokio::spawn(async move { inner.close_session(session).await });
}

async fn consume_native_events(
    inner: Arc<Inner>,
    session: u64,
    principal: Pubkey,
    mut events: BoxStream<'static, PushEvent>,
) {
    while let Some(event) = events.next().await {
        inner.apply_native_event(principal, event);
    }
    error!("❌ [PUSH] Native balance stream for {} ended", principal);
    tokio::spawn(async move { inner.close_session(session).await });
}

async fn follow_account_writes(inner: Arc<Inner>, mut writes: watch::Receiver<u64>) {
    while writes.changed().await.is_ok() {
        inner.republish_owned();
    }
}
