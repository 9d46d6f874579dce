use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::location::Location;

/// Stable identifier of a confinable subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(Uuid);

impl SubjectId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for SubjectId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for SubjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Sentence state. `Released` is terminal: a record entering it is removed
/// from the store and from durable storage in the same transition, so it is
/// never observable at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentenceStatus {
    Running,
    Paused,
    Released,
}

impl std::fmt::Display for SentenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Released => write!(f, "released"),
        }
    }
}

/// Why a subject left confinement. Carried on the release event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseCause {
    /// The sentence clock ran `remaining` down to zero.
    SentenceServed,
    /// An operator released the subject before the sentence was served.
    Manual,
    /// The subject held an exemption when first observed in the world.
    Exempt,
}

/// Live confinement state for one subject.
///
/// Owned exclusively by the prisoner store; the durable encoding is a
/// separate snapshot type so the clock bookkeeping below never leaks to
/// disk.
#[derive(Debug, Clone)]
pub struct ConfinementRecord {
    pub subject: SubjectId,
    /// Canonical jail name. May dangle after its jail is deleted with no
    /// fallback remaining.
    pub jail_name: String,
    /// Never increases while `Running`; unchanged while `Paused`.
    pub remaining: Duration,
    pub status: SentenceStatus,
    /// None until the subject is first observed after confinement.
    pub last_known_location: Option<Location>,
    pub confined_by: String,
    /// Parent groups captured before the confinement group replaced them,
    /// in capture order without duplicates.
    pub saved_groups: Vec<String>,
    /// Last tick instant while the clock is actively advancing.
    pub(crate) checkpoint: Option<Instant>,
    /// Set when a disconnect freezes a Running sentence; taken exactly once
    /// by the reconnect reconciliation.
    pub(crate) frozen_at: Option<Instant>,
}

impl ConfinementRecord {
    pub fn is_running(&self) -> bool {
        self.status == SentenceStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status == SentenceStatus::Paused
    }

    /// True while the clock is frozen awaiting a reconnect reconciliation.
    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }
}
