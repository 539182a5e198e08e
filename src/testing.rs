//! Mocks and byte builders shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use solana_program::{program_option::COption, program_pack::Pack};
use solana_sdk::pubkey::Pubkey;
use spl_token::state::{Account as TokenAccount, AccountState, Mint};
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::rpc::{
    PushEvent, PushFilter, PushSource, PushSubscription, RemoteSource, SubscriptionHandle,
};
use crate::state::decode::peek_token_owner;

pub fn encode_token_account(owner: &Pubkey, mint: &Pubkey, amount: u64) -> Vec<u8> {
    let account = TokenAccount {
        mint: *mint,
        owner: *owner,
        amount,
        delegate: COption::None,
        state: AccountState::Initialized,
        is_native: COption::None,
        delegated_amount: 0,
        close_authority: COption::None,
    };
    let mut data = vec![0u8; TokenAccount::LEN];
    TokenAccount::pack(account, &mut data).unwrap();
    data
}

pub fn encode_mint(decimals: u8, supply: u64, mint_authority: Option<Pubkey>) -> Vec<u8> {
    let mint = Mint {
        mint_authority: mint_authority.map_or(COption::None, COption::Some),
        supply,
        decimals,
        is_initialized: true,
        freeze_authority: COption::None,
    };
    let mut data = vec![0u8; Mint::LEN];
    Mint::pack(mint, &mut data).unwrap();
    data
}

/// Token account push event as the program stream would deliver it.
pub fn token_event(key: Pubkey, owner: &Pubkey, mint: &Pubkey, amount: u64) -> PushEvent {
    let data = encode_token_account(owner, mint, amount);
    PushEvent {
        key,
        owner: peek_token_owner(&data),
        lamports: 2_039_280,
        data,
    }
}

/// Poll `condition` until it holds or a second passes.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// In‑memory ledger with call counters.
#[derive(Default)]
pub struct MockRemote {
    accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
    native: Mutex<HashMap<Pubkey, u64>>,
    reads: AtomicUsize,
    lists: AtomicUsize,
    read_multiple_calls: Mutex<Vec<usize>>,
    read_failure: Mutex<Option<String>>,
    read_gate: Mutex<Option<Arc<Semaphore>>>,
    list_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: Pubkey, data: Vec<u8>) {
        self.accounts.lock().unwrap().insert(key, data);
    }

    pub fn set_native(&self, owner: Pubkey, lamports: u64) {
        self.native.lock().unwrap().insert(owner, lamports);
    }

    pub fn fail_reads(&self, message: &str) {
        *self.read_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Block single reads until permits are added to the returned semaphore.
    pub fn hold_reads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.read_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Block owner listings until permits are added to the returned semaphore.
    pub fn hold_lists(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.list_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn read_multiple_calls(&self) -> Vec<usize> {
        self.read_multiple_calls.lock().unwrap().clone()
    }
}

async fn pass(gate: Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        let _permit = gate.acquire().await.unwrap();
    }
}

#[async_trait]
impl RemoteSource for MockRemote {
    async fn read(&self, key: &Pubkey) -> Result<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let gate = self.read_gate.lock().unwrap().clone();
        pass(gate).await;
        if let Some(message) = self.read_failure.lock().unwrap().clone() {
            return Err(anyhow!(message).context(format!("getAccountInfo {key}")));
        }
        Ok(self.accounts.lock().unwrap().get(key).cloned())
    }

    async fn read_multiple(&self, keys: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>> {
        self.read_multiple_calls.lock().unwrap().push(keys.len());
        let accounts = self.accounts.lock().unwrap();
        Ok(keys.iter().map(|key| accounts.get(key).cloned()).collect())
    }

    async fn list_by_owner(&self, owner: &Pubkey) -> Result<Vec<(Pubkey, Vec<u8>)>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let gate = self.list_gate.lock().unwrap().clone();
        pass(gate).await;
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts
            .iter()
            .filter(|(_, data)| peek_token_owner(data) == Some(*owner))
            .map(|(key, data)| (*key, data.clone()))
            .collect())
    }

    async fn native_balance(&self, owner: &Pubkey) -> Result<Option<u64>> {
        Ok(self.native.lock().unwrap().get(owner).copied())
    }
}

/// Push source whose streams are fed by the test.
#[derive(Default)]
pub struct MockPush {
    next_id: AtomicU64,
    senders: Mutex<HashMap<u64, (PushFilter, mpsc::UnboundedSender<PushEvent>)>>,
    subscribed: Mutex<Vec<PushFilter>>,
    unsubscribed: AtomicUsize,
    fail_program: AtomicBool,
}

impl MockPush {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_program_subscribe(&self) {
        self.fail_program.store(true, Ordering::SeqCst);
    }

    pub fn subscribed(&self) -> Vec<PushFilter> {
        self.subscribed.lock().unwrap().clone()
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.senders.lock().unwrap().len()
    }

    /// Simulate the server dropping every subscription.
    pub fn close_all(&self) {
        self.senders.lock().unwrap().clear();
    }

    /// Simulate the server dropping the subscriptions matching `filter`.
    pub fn close(&self, filter: &PushFilter) {
        self.senders.lock().unwrap().retain(|_, (f, _)| f != filter);
    }

    /// Deliver on the program stream. Returns false if nobody is subscribed.
    pub fn send_program(&self, event: PushEvent) -> bool {
        self.send_where(|filter| matches!(filter, PushFilter::Program { .. }), event)
    }

    /// Deliver a native balance change for `principal`.
    pub fn send_native(&self, principal: Pubkey, lamports: u64) -> bool {
        let event = PushEvent {
            key: principal,
            owner: None,
            lamports,
            data: Vec::new(),
        };
        self.send_where(|filter| *filter == PushFilter::Account(principal), event)
    }

    fn send_where<F: Fn(&PushFilter) -> bool>(&self, wanted: F, event: PushEvent) -> bool {
        let senders = self.senders.lock().unwrap();
        senders
            .values()
            .filter(|(filter, _)| wanted(filter))
            .any(|(_, tx)| tx.send(event.clone()).is_ok())
    }
}

#[async_trait]
impl PushSource for MockPush {
    async fn subscribe(&self, filter: PushFilter) -> Result<PushSubscription> {
        if matches!(filter, PushFilter::Program { .. }) && self.fail_program.load(Ordering::SeqCst) {
            return Err(anyhow!("websocket closed"));
        }
        self.subscribed.lock().unwrap().push(filter.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(id, (filter, tx));
        Ok(PushSubscription {
            handle: SubscriptionHandle(id),
            events: UnboundedReceiverStream::new(rx).boxed(),
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        self.senders
            .lock()
            .unwrap()
            .remove(&handle.0)
            .ok_or_else(|| anyhow!("unknown subscription {}", handle.0))?;
        self.unsubscribed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
