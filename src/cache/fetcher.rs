//! One remote read + decode per call. Caching lives in [`super::RecordCache`].

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;

use super::FetchError;
use crate::rpc::RemoteSource;
use crate::state::{decode, Record, RecordKind};

#[derive(Clone)]
pub struct Fetcher {
    remote: Arc<dyn RemoteSource>,
}

impl Fetcher {
    pub fn new(remote: Arc<dyn RemoteSource>) -> Self {
        Self { remote }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteSource> {
        &self.remote
    }

    pub async fn fetch(&self, key: Pubkey, kind: RecordKind) -> Result<Record, FetchError> {
        let data = self
            .remote
            .read(&key)
            .await
            .map_err(FetchError::transport)?
            .ok_or(FetchError::NotFound(key))?;
        Ok(decode(key, &data, kind)?)
    }
}
