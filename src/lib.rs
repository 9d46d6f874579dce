// ============================================================================
// Stockade Library
// ============================================================================

pub mod config;
pub mod core;
pub mod events;
pub mod facade;
pub mod groups;
pub mod host;
pub mod migrate;
pub mod prelude;
pub mod prisoner;
pub mod registry;
pub mod storage;

// Re-export main types for convenience
pub use crate::core::{
    ConfinementRecord, Error, Jail, Location, ReleaseCause, Result, SentenceStatus, SubjectId,
};
pub use config::StockadeConfig;
pub use facade::{ConfineRequest, Stockade};

// Re-export the embedder integration surface
pub use events::{ConsumerId, Event, EventBus, EventHandler, EventKind, SubscriptionId};
pub use groups::{GroupAuthority, GroupSynchronizer, NullAuthority};
pub use host::{HostPlatform, NoopHost};
pub use prisoner::{ClockWorker, spawn_autosave, spawn_sentence_clock, spawn_workers};
