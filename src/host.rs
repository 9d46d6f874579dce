use crate::core::{Location, SubjectId};

/// Capabilities the embedding host supplies to the engine.
///
/// The engine asks the host to move subjects around and to answer
/// permission checks; it never learns how either is implemented. Both
/// calls happen on the engine's writer thread and must not block.
pub trait HostPlatform: Send + Sync {
    /// Dispatches a teleport for a connected subject. Fire and forget:
    /// the engine does not observe whether it succeeded.
    fn teleport(&self, subject: SubjectId, location: &Location);

    /// Whether the subject currently holds an exemption from confinement.
    fn has_exemption(&self, subject: SubjectId) -> bool;
}

/// Host with no world and no permissions. Teleports are discarded and no
/// subject is ever exempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl HostPlatform for NoopHost {
    fn teleport(&self, _subject: SubjectId, _location: &Location) {}

    fn has_exemption(&self, _subject: SubjectId) -> bool {
        false
    }
}
