//! Collaborator seams: remote reads and the live push stream.
//!
//! The cache never talks to the network directly. Everything goes through
//! these two traits so the core can be driven by mocks in tests and by
//! [`solana::SolanaRemote`] / [`solana::SolanaPush`] in production.

pub mod solana;

use async_trait::async_trait;
use futures::stream::BoxStream;
use solana_sdk::pubkey::Pubkey;

/// Request/response reads against the ledger.
#[async_trait]
pub trait RemoteSource: Send + Sync + 'static {
    /// Raw bytes stored at `key`, or `None` if the account does not exist.
    async fn read(&self, key: &Pubkey) -> anyhow::Result<Option<Vec<u8>>>;

    /// Batched [`read`](Self::read); the result is positionally aligned with `keys`.
    async fn read_multiple(&self, keys: &[Pubkey]) -> anyhow::Result<Vec<Option<Vec<u8>>>>;

    /// Every token account owned by `owner`, as `(key, bytes)`.
    async fn list_by_owner(&self, owner: &Pubkey) -> anyhow::Result<Vec<(Pubkey, Vec<u8>)>>;

    /// Lamports held by the system account `owner`, `None` if it does not exist.
    async fn native_balance(&self, owner: &Pubkey) -> anyhow::Result<Option<u64>>;
}

/// What a push subscription listens to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushFilter {
    /// All accounts of `program_id` whose data is exactly `data_size` bytes.
    Program { program_id: Pubkey, data_size: u64 },
    /// A single account, used for the principal's native balance.
    Account(Pubkey),
}

/// One inbound change from the live stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushEvent {
    pub key: Pubkey,
    /// Token owner peeked from the payload, when it parses as a token account.
    pub owner: Option<Pubkey>,
    pub lamports: u64,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

pub struct PushSubscription {
    pub handle: SubscriptionHandle,
    pub events: BoxStream<'static, PushEvent>,
}

/// Live change notifications.
#[async_trait]
pub trait PushSource: Send + Sync + 'static {
    async fn subscribe(&self, filter: PushFilter) -> anyhow::Result<PushSubscription>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> anyhow::Result<()>;
}
