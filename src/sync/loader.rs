//! Bulk Loader – seeds the account container with everything a principal owns.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use solana_sdk::pubkey::Pubkey;

use crate::rpc::RemoteSource;
use crate::state::{decode, AccountRecord, Record, RecordKind, RecordStore};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub stored: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct BulkLoader {
    remote: Arc<dyn RemoteSource>,
    accounts: Arc<RecordStore<AccountRecord>>,
}

impl BulkLoader {
    pub fn new(remote: Arc<dyn RemoteSource>, accounts: Arc<RecordStore<AccountRecord>>) -> Self {
        Self { remote, accounts }
    }

    /// One owner listing, every decodable result written over whatever was cached.
    ///
    /// Safe to run concurrently for different principals; overlapping keys
    /// resolve to whichever write lands last.
    pub async fn load_owned(&self, principal: Pubkey) -> Result<LoadSummary> {
        let listed = self
            .remote
            .list_by_owner(&principal)
            .await
            .with_context(|| format!("listing token accounts of {principal}"))?;

        let mut summary = LoadSummary::default();
        for (key, data) in listed {
            match decode(key, &data, RecordKind::Account) {
                Ok(Record::Account(account)) => {
                    self.accounts.put(key, account);
                    summary.stored += 1;
                }
                Ok(_) => summary.skipped += 1,
                Err(e) => {
                    warn!("⚠️ [BULK] Skipping {}: {}", key, e);
                    summary.skipped += 1;
                }
            }
        }

        info!(
            "📦 [BULK] Loaded {} token accounts for {} ({} skipped)",
            summary.stored, principal, summary.skipped
        );
        Ok(summary)
    }
}
