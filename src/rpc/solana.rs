//! `solana-client` / `solana-pubsub-client` backed collaborators.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use log::{debug, info, warn};
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig},
    rpc_filter::{Memcmp, RpcFilterType},
};
use solana_pubsub_client::nonblocking::pubsub_client::PubsubClient;
use solana_sdk::{account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{PushEvent, PushFilter, PushSource, PushSubscription, RemoteSource, SubscriptionHandle};
use crate::state::decode::{peek_token_owner, TOKEN_ACCOUNT_LEN};

/// Offset of the owner field inside a packed token account.
const TOKEN_OWNER_OFFSET: usize = 32;

pub struct SolanaRemote {
    rpc: RpcClient,
    token_program_id: Pubkey,
    commitment: CommitmentConfig,
}

impl SolanaRemote {
    pub fn new(rpc_url: String, token_program_id: Pubkey, commitment: CommitmentConfig) -> Self {
        info!("🌐 [RPC] Remote source on {} (commitment {:?})", rpc_url, commitment.commitment);
        Self {
            rpc: RpcClient::new_with_commitment(rpc_url, commitment),
            token_program_id,
            commitment,
        }
    }

    fn account_config(&self) -> RpcAccountInfoConfig {
        RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64),
            commitment: Some(self.commitment),
            ..RpcAccountInfoConfig::default()
        }
    }
}

#[async_trait]
impl RemoteSource for SolanaRemote {
    async fn read(&self, key: &Pubkey) -> Result<Option<Vec<u8>>> {
        let response = self
            .rpc
            .get_account_with_commitment(key, self.commitment)
            .await
            .with_context(|| format!("getAccountInfo {key}"))?;
        Ok(response.value.map(|account| account.data))
    }

    async fn read_multiple(&self, keys: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>> {
        let accounts = self
            .rpc
            .get_multiple_accounts_with_commitment(keys, self.commitment)
            .await
            .with_context(|| format!("getMultipleAccounts ({} keys)", keys.len()))?
            .value;
        Ok(accounts
            .into_iter()
            .map(|account| account.map(|a| a.data))
            .collect())
    }

    async fn list_by_owner(&self, owner: &Pubkey) -> Result<Vec<(Pubkey, Vec<u8>)>> {
        let config = RpcProgramAccountsConfig {
            filters: Some(vec![
                RpcFilterType::DataSize(TOKEN_ACCOUNT_LEN as u64),
                RpcFilterType::Memcmp(Memcmp::new_base58_encoded(
                    TOKEN_OWNER_OFFSET,
                    owner.as_ref(),
                )),
            ]),
            account_config: self.account_config(),
            ..RpcProgramAccountsConfig::default()
        };
        let accounts = self
            .rpc
            .get_program_accounts_with_config(&self.token_program_id, config)
            .await
            .with_context(|| format!("getProgramAccounts by owner {owner}"))?;
        Ok(accounts
            .into_iter()
            .map(|(key, account)| (key, account.data))
            .collect())
    }

    async fn native_balance(&self, owner: &Pubkey) -> Result<Option<u64>> {
        let response = self
            .rpc
            .get_account_with_commitment(owner, self.commitment)
            .await
            .with_context(|| format!("getAccountInfo {owner}"))?;
        Ok(response.value.map(|account| account.lamports))
    }
}

/// Websocket subscriptions, each forwarded from its own task into a channel.
pub struct SolanaPush {
    client: Arc<PubsubClient>,
    commitment: CommitmentConfig,
    next_id: AtomicU64,
    stops: DashMap<u64, oneshot::Sender<()>>,
}

impl SolanaPush {
    pub async fn connect(ws_url: &str, commitment: CommitmentConfig) -> Result<Self> {
        let client = PubsubClient::new(ws_url)
            .await
            .with_context(|| format!("connecting pubsub {ws_url}"))?;
        info!("🔌 [PUSH] Connected to {}", ws_url);
        Ok(Self {
            client: Arc::new(client),
            commitment,
            next_id: AtomicU64::new(1),
            stops: DashMap::new(),
        })
    }
}

#[async_trait]
impl PushSource for SolanaPush {
    async fn subscribe(&self, filter: PushFilter) -> Result<PushSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let client = Arc::clone(&self.client);
        let account_config = RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64),
            commitment: Some(self.commitment),
            ..RpcAccountInfoConfig::default()
        };
        tokio::spawn(forward(client, filter.clone(), account_config, tx, ready_tx, stop_rx));

        ready_rx
            .await
            .map_err(|_| anyhow!("subscription task for {filter:?} exited early"))??;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.stops.insert(id, stop_tx);
        debug!("📡 [PUSH] Subscription {} active for {:?}", id, filter);

        Ok(PushSubscription {
            handle: SubscriptionHandle(id),
            events: UnboundedReceiverStream::new(rx).boxed(),
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let (_, stop) = self
            .stops
            .remove(&handle.0)
            .ok_or_else(|| anyhow!("unknown subscription {}", handle.0))?;
        // The task may already be gone if the socket closed.
        let _ = stop.send(());
        debug!("📴 [PUSH] Subscription {} released", handle.0);
        Ok(())
    }
}

/// Owns one websocket subscription until told to stop or the stream ends.
async fn forward(
    client: Arc<PubsubClient>,
    filter: PushFilter,
    account_config: RpcAccountInfoConfig,
    tx: mpsc::UnboundedSender<PushEvent>,
    ready: oneshot::Sender<Result<()>>,
    mut stop: oneshot::Receiver<()>,
) {
    match filter {
        PushFilter::Program { program_id, data_size } => {
            let config = RpcProgramAccountsConfig {
                filters: Some(vec![RpcFilterType::DataSize(data_size)]),
                account_config,
                ..RpcProgramAccountsConfig::default()
            };
            let (mut stream, unsubscribe) =
                match client.program_subscribe(&program_id, Some(config)).await {
                    Ok(subscribed) => subscribed,
                    Err(e) => {
                        let _ = ready.send(Err(anyhow!(e).context("programSubscribe")));
                        return;
                    }
                };
            let _ = ready.send(Ok(()));

            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    next = stream.next() => {
                        let Some(update) = next else {
                            warn!("⚠️ [PUSH] Program stream for {} closed by server", program_id);
                            break;
                        };
                        let key = match update.value.pubkey.parse::<Pubkey>() {
                            Ok(key) => key,
                            Err(e) => {
                                debug!("[PUSH] Bad pubkey {} in notification: {}", update.value.pubkey, e);
                                continue;
                            }
                        };
                        let Some(account) = update.value.account.decode::<Account>() else {
                            debug!("[PUSH] Undecodable payload for {}", key);
                            continue;
                        };
                        if tx.send(to_event(key, account)).is_err() {
                            break;
                        }
                    }
                }
            }
            unsubscribe().await;
        }
        PushFilter::Account(key) => {
            let (mut stream, unsubscribe) =
                match client.account_subscribe(&key, Some(account_config)).await {
                    Ok(subscribed) => subscribed,
                    Err(e) => {
                        let _ = ready.send(Err(anyhow!(e).context("accountSubscribe")));
                        return;
                    }
                };
            let _ = ready.send(Ok(()));

            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    next = stream.next() => {
                        let Some(update) = next else {
                            warn!("⚠️ [PUSH] Account stream for {} closed by server", key);
                            break;
                        };
                        let Some(account) = update.value.decode::<Account>() else {
                            continue;
                        };
                        if tx.send(to_event(key, account)).is_err() {
                            break;
                        }
                    }
                }
            }
            unsubscribe().await;
        }
    }
}

fn to_event(key: Pubkey, account: Account) -> PushEvent {
    PushEvent {
        key,
        owner: peek_token_owner(&account.data),
        lamports: account.lamports,
        data: account.data,
    }
}
