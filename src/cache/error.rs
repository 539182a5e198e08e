use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::state::DecodeError;

/// Why a lookup failed. Cloned verbatim to every caller sharing a fetch.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("record {0} not found")]
    NotFound(Pubkey),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Wrap a collaborator failure, keeping its whole context chain.
    pub fn transport(err: anyhow::Error) -> Self {
        FetchError::Transport(format!("{err:#}"))
    }
}
