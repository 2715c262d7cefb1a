//! Job progress tracking across a fast cache and a durable store.

pub mod fast_store;
pub mod ledger;

pub use fast_store::{FastStore, FastStoreError, MemoryFastStore};
pub use ledger::{LedgerError, ProgressLedger, DEFAULT_FAST_TTL};
