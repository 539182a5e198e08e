//! Raw bytes → typed records.

use solana_program::{program_option::COption, program_pack::Pack};
use solana_sdk::pubkey::Pubkey;
use spl_token::state::{Account as TokenAccount, AccountState, Mint};
use thiserror::Error;

use super::{AccountRecord, MintRecord, Record, RecordKind};

/// Packed length of an SPL token account.
pub const TOKEN_ACCOUNT_LEN: usize = TokenAccount::LEN;
/// Packed length of an SPL mint.
pub const MINT_LEN: usize = Mint::LEN;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("cannot decode {kind} {key} ({len} bytes): {reason}")]
pub struct DecodeError {
    pub key: Pubkey,
    pub kind: RecordKind,
    pub len: usize,
    pub reason: String,
}

/// Decode `data` as the given kind of record stored under `key`.
pub fn decode(key: Pubkey, data: &[u8], kind: RecordKind) -> Result<Record, DecodeError> {
    let fail = |reason: String| DecodeError {
        key,
        kind,
        len: data.len(),
        reason,
    };

    match kind {
        RecordKind::Account => {
            let account = TokenAccount::unpack(data).map_err(|e| fail(e.to_string()))?;
            Ok(Record::Account(AccountRecord {
                key,
                owner: account.owner,
                mint: account.mint,
                balance: account.amount,
                delegate: pubkey_option(account.delegate),
                delegated_amount: account.delegated_amount,
                is_native: account.is_native.is_some(),
                is_frozen: account.state == AccountState::Frozen,
                raw_meta: data.to_vec(),
            }))
        }
        RecordKind::Mint => {
            let mint = Mint::unpack(data).map_err(|e| fail(e.to_string()))?;
            Ok(Record::Mint(MintRecord {
                key,
                decimals: mint.decimals,
                supply: mint.supply,
                mint_authority: pubkey_option(mint.mint_authority),
                freeze_authority: pubkey_option(mint.freeze_authority),
            }))
        }
    }
}

/// Token owner embedded in raw token account bytes, if they look like one.
pub fn peek_token_owner(data: &[u8]) -> Option<Pubkey> {
    use spl_token::state::GenericTokenAccount;
    TokenAccount::unpack_account_owner(data).copied()
}

fn pubkey_option(value: COption<Pubkey>) -> Option<Pubkey> {
    match value {
        COption::Some(key) => Some(key),
        COption::None => None,
    }
}
