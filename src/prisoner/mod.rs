pub mod clock;
pub mod store;

pub use clock::{ClockWorker, spawn_autosave, spawn_sentence_clock, spawn_workers};
pub use store::{ConnectOutcome, PrisonerStore, SpawnOutcome};
