use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::{Level, event, info_span};

use crate::core::{Error, Jail, Result, SubjectId, canonical_name};
use crate::migrate::SchemaMigrator;

use super::document::ConfinementDocument;
use super::writer::{PendingOp, WriteQueue};

pub const JAILS_DIR: &str = "jails";
pub const PRISONERS_DIR: &str = "prisoners";

/// Durable read/write of jail and confinement documents.
///
/// Reads happen inline. Writes are immutable snapshots serialized at enqueue
/// time and handed to a single background worker: per-key FIFO, coalesced to
/// the newest payload, atomically replaced on disk. `save_*` returning does
/// not mean the bytes are durable yet.
pub struct PersistenceGateway {
    jails_dir: PathBuf,
    prisoners_dir: PathBuf,
    migrator: SchemaMigrator,
    queue: WriteQueue,
}

impl PersistenceGateway {
    /// Opens the data directory, sweeps temp files left behind by a crash,
    /// and starts the write worker.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let jails_dir = root.join(JAILS_DIR);
        let prisoners_dir = root.join(PRISONERS_DIR);
        fs::create_dir_all(&jails_dir).await?;
        fs::create_dir_all(&prisoners_dir).await?;
        sweep_temp_files(&jails_dir).await;
        sweep_temp_files(&prisoners_dir).await;

        let migrator = SchemaMigrator::confinement_chain();
        migrator.validate()?;

        Ok(Self {
            jails_dir,
            prisoners_dir,
            migrator,
            queue: WriteQueue::start(),
        })
    }

    /// Loads every jail document. Unreadable entries are logged and skipped;
    /// the rest of the load continues.
    pub async fn load_all_jails(&self) -> Result<Vec<Jail>> {
        let span = info_span!("gateway.load_jails");
        let _enter = span.enter();

        let mut jails = Vec::new();
        let mut entries = fs::read_dir(&self.jails_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_document(&path) {
                continue;
            }
            match read_jail(&path).await {
                Ok(jail) => jails.push(jail),
                Err(err) => {
                    event!(
                        Level::ERROR,
                        path = %path.display(),
                        error = %err,
                        "skipping unreadable jail document"
                    );
                }
            }
        }
        Ok(jails)
    }

    /// Loads every confinement document, migrating each to the current
    /// schema before decoding. Corrupt or future-version entries are logged
    /// and skipped (the file stays on disk untouched); the rest of the load
    /// continues.
    pub async fn load_all_confinements(&self) -> Result<Vec<(SubjectId, ConfinementDocument)>> {
        let span = info_span!("gateway.load_confinements");
        let _enter = span.enter();

        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.prisoners_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_document(&path) {
                continue;
            }
            match self.read_confinement(&path).await {
                Ok(loaded) => records.push(loaded),
                Err(err) => {
                    event!(
                        Level::ERROR,
                        path = %path.display(),
                        error = %err,
                        "skipping unreadable confinement document"
                    );
                }
            }
        }
        Ok(records)
    }

    async fn read_confinement(&self, path: &Path) -> Result<(SubjectId, ConfinementDocument)> {
        let subject = subject_from_path(path)?;
        let bytes = fs::read(path).await?;
        let mut raw: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|err| Error::CorruptRecord(err.to_string()))?;
        self.migrator.migrate_to_current(&mut raw)?;
        let doc = ConfinementDocument::decode(raw)?;
        Ok((subject, doc))
    }

    /// Queues a durable write for a jail. Only serialization errors surface
    /// here; I/O failures later are logged and counted by the worker.
    pub fn save_jail(&self, jail: &Jail) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(jail)
            .map_err(|err| Error::PersistenceFailure(err.to_string()))?;
        self.queue
            .enqueue(self.jail_path(&jail.name), PendingOp::Save(bytes))
    }

    /// Queues removal of a jail document; removing an absent one is fine.
    pub fn delete_jail(&self, name: &str) -> Result<()> {
        self.queue.enqueue(self.jail_path(name), PendingOp::Delete)
    }

    /// Queues a durable write of one confinement snapshot.
    pub fn save_confinement(&self, subject: SubjectId, doc: &ConfinementDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|err| Error::PersistenceFailure(err.to_string()))?;
        self.queue
            .enqueue(self.confinement_path(subject), PendingOp::Save(bytes))
    }

    /// Queues removal of a confinement document; idempotent.
    pub fn delete_confinement(&self, subject: SubjectId) -> Result<()> {
        self.queue
            .enqueue(self.confinement_path(subject), PendingOp::Delete)
    }

    /// Background write failures since open.
    pub fn write_failures(&self) -> u64 {
        self.queue.failures()
    }

    /// Drains queued writes within the grace period and stops the worker.
    pub async fn close(&mut self, grace: Duration) {
        self.queue.close(grace).await;
    }

    fn jail_path(&self, name: &str) -> PathBuf {
        self.jails_dir.join(format!("{}.json", canonical_name(name)))
    }

    fn confinement_path(&self, subject: SubjectId) -> PathBuf {
        self.prisoners_dir.join(format!("{}.json", subject))
    }
}

async fn read_jail(path: &Path) -> Result<Jail> {
    let bytes = fs::read(path).await?;
    let mut jail: Jail =
        serde_json::from_slice(&bytes).map_err(|err| Error::CorruptRecord(err.to_string()))?;
    jail.name = canonical_name(&jail.name);
    Ok(jail)
}

async fn sweep_temp_files(dir: &Path) {
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            if let Err(err) = fs::remove_file(&path).await {
                event!(
                    Level::WARN,
                    path = %path.display(),
                    error = %err,
                    "could not remove stale temp file"
                );
            }
        }
    }
}

fn is_document(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

fn subject_from_path(path: &Path) -> Result<SubjectId> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse().ok())
        .ok_or_else(|| {
            Error::CorruptRecord(format!("file name is not a subject id: {}", path.display()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Location;
    use tempfile::TempDir;

    #[tokio::test]
    async fn jail_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut gateway = PersistenceGateway::open(dir.path()).await.unwrap();

        let jail = Jail::new("Block-D", Location::new("world0", 0.0, 64.0, 0.0));
        gateway.save_jail(&jail).unwrap();
        gateway.close(Duration::from_secs(5)).await;

        let gateway = PersistenceGateway::open(dir.path()).await.unwrap();
        let jails = gateway.load_all_jails().await.unwrap();
        assert_eq!(jails.len(), 1);
        assert_eq!(jails[0].name, "block-d");
    }

    #[tokio::test]
    async fn open_sweeps_stale_temp_files() {
        let dir = TempDir::new().unwrap();
        let jails_dir = dir.path().join(JAILS_DIR);
        std::fs::create_dir_all(&jails_dir).unwrap();
        let stale = jails_dir.join("half-written.tmp");
        std::fs::write(&stale, b"{").unwrap();

        let _gateway = PersistenceGateway::open(dir.path()).await.unwrap();
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn non_uuid_file_name_is_skipped() {
        let dir = TempDir::new().unwrap();
        let prisoners_dir = dir.path().join(PRISONERS_DIR);
        std::fs::create_dir_all(&prisoners_dir).unwrap();
        std::fs::write(prisoners_dir.join("not-a-uuid.json"), b"{}").unwrap();

        let gateway = PersistenceGateway::open(dir.path()).await.unwrap();
        let records = gateway.load_all_confinements().await.unwrap();
        assert!(records.is_empty());
    }
}
