//! Keeping the cache in step with the ledger: snapshot loads and live pushes.

pub mod loader;
pub mod reconciler;

pub use loader::{BulkLoader, LoadSummary};
pub use reconciler::{EventOutcome, Reconciler, SessionState, TrackingConfig};
