//! Decoded record types and the keyed containers that hold them.
//!
//! Keys are plain `Pubkey`s: the base‑58 form is the canonical encoding,
//! so two keys compare equal exactly when their encodings do.

pub mod decode;
pub mod store;

use std::fmt;

use solana_sdk::pubkey::Pubkey;

pub use decode::{decode, DecodeError};
pub use store::RecordStore;

/// Which container a key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Account,
    Mint,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Account => f.write_str("account"),
            RecordKind::Mint => f.write_str("mint"),
        }
    }
}

/// A decoded SPL token account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountRecord {
    pub key: Pubkey,
    pub owner: Pubkey,
    pub mint: Pubkey,
    pub balance: u64,
    pub delegate: Option<Pubkey>,
    pub delegated_amount: u64,
    pub is_native: bool,
    pub is_frozen: bool,
    /// Undecoded account bytes as they arrived. Empty for the native pseudo‑record.
    pub raw_meta: Vec<u8>,
}

impl AccountRecord {
    /// Pseudo‑record for a principal's native (SOL) balance.
    ///
    /// Addressed by the principal's own key, not by a token account key.
    pub fn wrapped_native(principal: Pubkey, lamports: u64) -> Self {
        Self {
            key: principal,
            owner: principal,
            mint: spl_token::native_mint::id(),
            balance: lamports,
            delegate: None,
            delegated_amount: 0,
            is_native: true,
            is_frozen: false,
            raw_meta: Vec::new(),
        }
    }
}

/// A decoded SPL mint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MintRecord {
    pub key: Pubkey,
    pub decimals: u8,
    pub supply: u64,
    pub mint_authority: Option<Pubkey>,
    pub freeze_authority: Option<Pubkey>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Account(AccountRecord),
    Mint(MintRecord),
}

impl Record {
    pub fn key(&self) -> Pubkey {
        match self {
            Record::Account(a) => a.key,
            Record::Mint(m) => m.key,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Account(_) => RecordKind::Account,
            Record::Mint(_) => RecordKind::Mint,
        }
    }
}

/// Record types that can live in a [`RecordStore`] behind the dedup cache.
pub trait CachedRecord: Clone + Send + Sync + 'static {
    const KIND: RecordKind;

    fn from_record(record: Record) -> Option<Self>;
}

impl CachedRecord for AccountRecord {
    const KIND: RecordKind = RecordKind::Account;

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Account(a) => Some(a),
            Record::Mint(_) => None,
        }
    }
}

impl CachedRecord for MintRecord {
    const KIND: RecordKind = RecordKind::Mint;

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Mint(m) => Some(m),
            Record::Account(_) => None,
        }
    }
}
