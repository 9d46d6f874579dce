//! Best-effort mirroring of confinement into an external group authority.
//!
//! The authority is a side channel, never a source of truth: every call here
//! may fail with [`Error::BackendUnavailable`], and callers log the failure
//! and move on. Mirrored group state being stale until the next attempt is
//! the accepted failure mode.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use log::{info, warn};

use crate::core::{Error, Result, SubjectId};

/// Capability interface over one external permission authority.
#[async_trait]
pub trait GroupAuthority: Send + Sync {
    /// Short backend name for logs ("luckperms", "vault", ...).
    fn name(&self) -> &str;

    /// One-shot availability check, run at startup to pick a backend.
    async fn probe(&self) -> bool;

    async fn primary_group(&self, subject: SubjectId) -> Result<String>;

    async fn parent_groups(&self, subject: SubjectId) -> Result<Vec<String>>;

    /// Replaces the subject's group membership wholesale.
    async fn set_groups(&self, subject: SubjectId, groups: &[String]) -> Result<()>;
}

/// Authority that answers with empty data and accepts every write. Stands in
/// when no real backend is configured or none answered the startup probe.
pub struct NullAuthority;

#[async_trait]
impl GroupAuthority for NullAuthority {
    fn name(&self) -> &str {
        "null"
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn primary_group(&self, _subject: SubjectId) -> Result<String> {
        Ok(String::new())
    }

    async fn parent_groups(&self, _subject: SubjectId) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn set_groups(&self, _subject: SubjectId, _groups: &[String]) -> Result<()> {
        Ok(())
    }
}

/// Captures and restores group membership around a confinement.
///
/// Cloning is cheap; the release path hands clones to spawned tasks so group
/// calls can trail behind the tick loop.
#[derive(Clone)]
pub struct GroupSynchronizer {
    backend: Option<Arc<dyn GroupAuthority>>,
    confinement_group: String,
}

impl GroupSynchronizer {
    pub fn new(backend: Arc<dyn GroupAuthority>, confinement_group: impl Into<String>) -> Self {
        Self {
            backend: Some(backend),
            confinement_group: confinement_group.into(),
        }
    }

    /// Synchronizer with no backend; every operation is a no-op.
    pub fn disabled(confinement_group: impl Into<String>) -> Self {
        Self {
            backend: None,
            confinement_group: confinement_group.into(),
        }
    }

    /// Probes all candidates concurrently and activates the first one (in
    /// the caller's priority order) that reports available; with none
    /// available the synchronizer runs disabled.
    pub async fn select(
        candidates: Vec<Arc<dyn GroupAuthority>>,
        confinement_group: impl Into<String>,
    ) -> Self {
        let probes = join_all(candidates.iter().map(|backend| backend.probe())).await;

        for (backend, available) in candidates.into_iter().zip(probes) {
            if available {
                info!("group authority '{}' selected", backend.name());
                return Self::new(backend, confinement_group);
            }
            warn!(
                "group authority '{}' did not answer the startup probe",
                backend.name()
            );
        }

        info!("no group authority available, group sync disabled");
        Self::disabled(confinement_group)
    }

    pub fn is_active(&self) -> bool {
        self.backend.is_some()
    }

    pub fn confinement_group(&self) -> &str {
        &self.confinement_group
    }

    pub async fn fetch_primary_group(&self, subject: SubjectId) -> Result<Option<String>> {
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        let group = backend.primary_group(subject).await?;
        Ok(Some(group))
    }

    pub async fn fetch_parent_groups(&self, subject: SubjectId) -> Result<Vec<String>> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };
        backend.parent_groups(subject).await
    }

    /// Captures the subject's current parent groups, then replaces their
    /// membership with solely the confinement group. Returns the capture
    /// (ordered, duplicate-free) for storage on the record.
    ///
    /// Only a failed capture is an error. A failed replacement is logged
    /// and the capture is returned anyway; the restore path needs it.
    pub async fn set_confinement_group(&self, subject: SubjectId) -> Result<Vec<String>> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };

        let mut captured: Vec<String> = Vec::new();
        for group in backend.parent_groups(subject).await? {
            if !captured.contains(&group) {
                captured.push(group);
            }
        }

        if let Err(err) = backend
            .set_groups(subject, std::slice::from_ref(&self.confinement_group))
            .await
        {
            warn!("setting confinement group for {} failed: {}", subject, err);
        }
        Ok(captured)
    }

    /// Clears the confinement group by reinstating the captured membership.
    pub async fn restore_parent_groups(
        &self,
        subject: SubjectId,
        saved_groups: &[String],
    ) -> Result<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        backend.set_groups(subject, saved_groups).await
    }
}
