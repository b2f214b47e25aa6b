//! Client-side cache: a durable string-keyed backend, a generic persisted
//! value primitive with hydration-queue semantics, and the sync layer that
//! decides per request whether cached local data suffices.

mod backend;
mod collapse;
mod persisted;
mod sync;

pub use backend::{MemoryBackend, SqliteBackend, StorageBackend};
pub use collapse::next_anchor;
pub use persisted::PersistedStore;
pub use sync::{CachedPageList, SyncClient, UiSettings};
