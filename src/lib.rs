//! Local, eventually consistent view of SPL token accounts and mints.
//!
//! Reads go through a single‑flight cache, a websocket push stream keeps
//! cached records fresh, and the "accounts owned by the active wallet"
//! view is derived from the cache on demand.

pub mod cache;
pub mod config;
pub mod notify;
pub mod rpc;
pub mod service;
pub mod state;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{FetchError, RecordCache};
pub use notify::{ChangeEvent, ChangeNotifier, SubscriptionToken};
pub use service::AccountCacheService;
pub use state::{AccountRecord, MintRecord, Record, RecordKind};
pub use sync::{SessionState, TrackingConfig};
