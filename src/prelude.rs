//! Recommended API entrypoints grouped by abstraction level.
//!
//! `embed` is the stable default for host integrations.
//! `advanced` is an explicit escape hatch for engine internals.

pub mod embed {
    //! Stable high-level surface for embedding the engine in a host.
    //!
    //! Intended usage in host code:
    //! - `Stockade` plus `StockadeConfig` for bootstrap,
    //! - `HostPlatform` and `GroupAuthority` impls for the host's world,
    //! - event subscriptions keyed by `ConsumerId`.
    pub use crate::{
        ConfineRequest, ConsumerId, Event, EventKind, GroupAuthority, HostPlatform, Jail, Location,
        NoopHost, ReleaseCause, SentenceStatus, Stockade, StockadeConfig, SubjectId, spawn_workers,
    };
}

pub mod advanced {
    //! Escape hatch for engine internals.
    //!
    //! Host-level product code should normally stay on `prelude::embed`.
    pub use crate::migrate::{MigrationStep, SchemaMigrator};
    pub use crate::prisoner::PrisonerStore;
    pub use crate::registry::JailRegistry;
    pub use crate::storage::{ConfinementDocument, PersistenceGateway};
}
