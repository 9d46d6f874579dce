use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{ConfinementRecord, Error, Location, Result, SentenceStatus, SubjectId};
use crate::migrate::CURRENT_SCHEMA_VERSION;

/// Durable encoding of one confinement record.
///
/// The subject id is the file stem, never a field. A released sentence is
/// never written; absence of a document means no active confinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfinementDocument {
    pub schema_version: u32,
    pub jail_name: String,
    pub remaining_seconds: u64,
    pub status: SentenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_location: Option<Location>,
    pub confined_by: String,
    #[serde(default)]
    pub saved_groups: Vec<String>,
}

impl ConfinementDocument {
    /// Immutable snapshot of a live record, taken at enqueue time.
    pub fn snapshot(record: &ConfinementRecord) -> Self {
        debug_assert!(record.status != SentenceStatus::Released);
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            jail_name: record.jail_name.clone(),
            remaining_seconds: record.remaining.as_secs(),
            status: record.status,
            last_known_location: record.last_known_location.clone(),
            confined_by: record.confined_by.clone(),
            saved_groups: record.saved_groups.clone(),
        }
    }

    /// Decodes a raw document that has already been run through the
    /// migration chain.
    pub fn decode(raw: serde_json::Value) -> Result<Self> {
        let doc: Self =
            serde_json::from_value(raw).map_err(|err| Error::CorruptRecord(err.to_string()))?;
        if doc.status == SentenceStatus::Released {
            return Err(Error::CorruptRecord(
                "a released sentence is never stored".to_string(),
            ));
        }
        Ok(doc)
    }

    /// Rehydrates the live record. Clock bookkeeping starts empty; the store
    /// decides the load-time status from its offline-time policy.
    pub fn into_record(self, subject: SubjectId) -> ConfinementRecord {
        ConfinementRecord {
            subject,
            jail_name: self.jail_name,
            remaining: Duration::from_secs(self.remaining_seconds),
            status: self.status,
            last_known_location: self.last_known_location,
            confined_by: self.confined_by,
            saved_groups: self.saved_groups,
            checkpoint: None,
            frozen_at: None,
        }
    }
}
