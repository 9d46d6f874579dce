use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::config::StockadeConfig;
use crate::core::{
    ConfinementRecord, Error, Jail, Location, ReleaseCause, Result, SubjectId, canonical_name,
};
use crate::events::{Event, EventBus};
use crate::groups::{GroupAuthority, GroupSynchronizer};
use crate::host::HostPlatform;
use crate::prisoner::{ConnectOutcome, PrisonerStore, SpawnOutcome};
use crate::registry::JailRegistry;
use crate::storage::{ConfinementDocument, PersistenceGateway};

/// Parameters for a confinement.
#[derive(Debug, Clone)]
pub struct ConfineRequest {
    pub subject: SubjectId,
    pub jail: String,
    pub sentence: Duration,
    pub confined_by: String,
}

impl ConfineRequest {
    pub fn new(subject: SubjectId, jail: impl Into<String>, sentence: Duration) -> Self {
        Self {
            subject,
            jail: jail.into(),
            sentence,
            confined_by: "console".to_string(),
        }
    }

    /// Name the issuer recorded on the sentence.
    pub fn confined_by(mut self, issuer: impl Into<String>) -> Self {
        self.confined_by = issuer.into();
        self
    }
}

/// The engine: jail registry, prisoner store, sentence clock entry points
/// and the persistence gateway behind one service object.
///
/// All mutation goes through `&mut self`, which makes the embedder's lock
/// the single logical writer the components assume. Operations that touch
/// the clock take an explicit instant in their `*_at` form; the plain forms
/// use [`Instant::now`]. Async operations need a tokio runtime; the
/// synchronous ones work from a plain host thread, where a release logs
/// a warning instead of spawning the group restore.
pub struct Stockade {
    config: StockadeConfig,
    host: Arc<dyn HostPlatform>,
    registry: JailRegistry,
    store: PrisonerStore,
    gateway: PersistenceGateway,
    groups: GroupSynchronizer,
    events: EventBus,
    due: Vec<SubjectId>,
}

impl Stockade {
    /// Opens the engine: selects a group authority from the candidates,
    /// opens the data directory and rehydrates every jail and confinement
    /// document found there.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use stockade::{NoopHost, Stockade, StockadeConfig};
    ///
    /// # tokio_test::block_on(async {
    /// let config = StockadeConfig::new("./data");
    /// let mut stockade = Stockade::open(config, Arc::new(NoopHost), Vec::new())
    ///     .await
    ///     .unwrap();
    /// stockade.tick();
    /// stockade.close().await;
    /// # });
    /// ```
    pub async fn open(
        config: StockadeConfig,
        host: Arc<dyn HostPlatform>,
        authority_candidates: Vec<Arc<dyn GroupAuthority>>,
    ) -> Result<Self> {
        let gateway = PersistenceGateway::open(&config.data_dir).await?;
        let groups =
            GroupSynchronizer::select(authority_candidates, config.confinement_group.clone()).await;

        let mut registry = JailRegistry::new();
        for jail in gateway.load_all_jails().await? {
            registry.install(jail);
        }

        let mut store = PrisonerStore::new(config.count_offline_time, config.tick_interval);
        let now = Instant::now();
        let loaded = gateway.load_all_confinements().await?;
        let record_count = loaded.len();
        for (subject, doc) in loaded {
            store.insert_loaded_at(doc.into_record(subject), now);
        }

        info!(
            "stockade open: {} jails, {} confinement records",
            registry.len(),
            record_count
        );

        Ok(Self {
            config,
            host,
            registry,
            store,
            gateway,
            groups,
            events: EventBus::new(),
            due: Vec::new(),
        })
    }

    // ---- jails ----

    /// Creates a jail anchored at `location` and persists it.
    pub fn create_jail(&mut self, name: &str, location: Location) -> Result<Jail> {
        let jail = self.registry.create(name, location)?.clone();
        self.persist_jail(&jail);
        info!("jail '{}' created", jail.name);
        self.events.publish(&Event::JailCreated {
            name: jail.name.clone(),
        });
        Ok(jail)
    }

    /// Deletes a jail. Confinements referencing it move to the first
    /// remaining jail in iteration order; with no jail left they keep the
    /// dangling name and a warning is logged.
    pub fn delete_jail(&mut self, name: &str) -> Result<()> {
        let (removed, fallback) = self.registry.delete(name)?;
        if let Err(err) = self.gateway.delete_jail(&removed.name) {
            warn!("queueing jail '{}' delete failed: {}", removed.name, err);
        }

        match fallback {
            Some(fallback) => {
                let mut affected = Vec::new();
                self.store.reassign_jail(&removed.name, &fallback, &mut affected);
                if !affected.is_empty() {
                    info!(
                        "jail '{}' deleted, {} confinements moved to '{}'",
                        removed.name,
                        affected.len(),
                        fallback
                    );
                }
                for subject in affected {
                    self.persist_record(subject);
                }
            }
            None => {
                let dangling = self.store.count_referencing(&removed.name);
                if dangling > 0 {
                    warn!(
                        "jail '{}' deleted with no fallback, {} confinements keep the dangling name",
                        removed.name, dangling
                    );
                }
            }
        }

        self.events.publish(&Event::JailDeleted { name: removed.name });
        Ok(())
    }

    /// Moves a jail's anchor point.
    pub fn relocate_jail(&mut self, name: &str, location: Location) -> Result<()> {
        self.registry.relocate(name, location)?;
        if let Some(jail) = self.registry.lookup(name) {
            self.persist_jail(jail);
        }
        Ok(())
    }

    /// Sets or clears a jail's dedicated release point.
    pub fn set_jail_release_location(
        &mut self,
        name: &str,
        location: Option<Location>,
    ) -> Result<()> {
        self.registry.set_release_location(name, location)?;
        if let Some(jail) = self.registry.lookup(name) {
            self.persist_jail(jail);
        }
        Ok(())
    }

    pub fn jail(&self, name: &str) -> Option<&Jail> {
        self.registry.lookup(name)
    }

    pub fn jails(&self) -> impl Iterator<Item = &Jail> {
        self.registry.all()
    }

    pub fn jail_count(&self) -> usize {
        self.registry.len()
    }

    // ---- sentences ----

    /// Confines a subject to a named jail.
    ///
    /// A first confinement captures the subject's groups through the active
    /// authority before replacing them with the confinement group; a failed
    /// capture is logged and the confinement proceeds with an empty capture.
    /// Confining an already confined subject replaces the sentence and
    /// keeps the original capture. A connected subject is teleported to the
    /// jail.
    pub async fn confine(&mut self, request: ConfineRequest) -> Result<()> {
        self.confine_at(request, Instant::now()).await
    }

    pub async fn confine_at(&mut self, request: ConfineRequest, now: Instant) -> Result<()> {
        let jail_name = canonical_name(&request.jail);
        if !self.registry.contains(&jail_name) {
            return Err(Error::RecordNotFound(jail_name));
        }

        let first = !self.store.is_confined(request.subject);
        let saved_groups = if first && self.groups.is_active() {
            match self.groups.set_confinement_group(request.subject).await {
                Ok(captured) => captured,
                Err(err) => {
                    warn!("group capture for {} failed: {}", request.subject, err);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let exempt = self.host.has_exemption(request.subject);
        let record = self.store.confine_at(
            request.subject,
            jail_name.clone(),
            request.sentence,
            request.confined_by,
            exempt,
            now,
        );
        if first {
            record.saved_groups = saved_groups;
        }
        let doc = ConfinementDocument::snapshot(record);

        if let Err(err) = self.gateway.save_confinement(request.subject, &doc) {
            warn!("queueing record write for {} failed: {}", request.subject, err);
        }
        if self.store.is_connected(request.subject) {
            if let Some(jail) = self.registry.lookup(&jail_name) {
                self.host.teleport(request.subject, &jail.location);
            }
        }

        info!(
            "{} confined to '{}' for {:?}",
            request.subject, jail_name, request.sentence
        );
        self.events.publish(&Event::PrisonerConfined {
            subject: request.subject,
            jail: jail_name,
        });
        Ok(())
    }

    /// Releases a subject ahead of time.
    pub fn release(&mut self, subject: SubjectId) -> Result<()> {
        if !self.store.is_confined(subject) {
            return Err(Error::RecordNotFound(subject.to_string()));
        }
        self.finish_release(subject, ReleaseCause::Manual);
        Ok(())
    }

    /// One sentence-clock step: advances every running record and releases
    /// the ones whose sentence ran out. Call at the configured cadence, or
    /// let [`spawn_sentence_clock`](crate::prisoner::spawn_sentence_clock)
    /// drive it.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        let mut due = std::mem::take(&mut self.due);
        due.clear();
        self.store.tick_at(now, &mut due);
        for subject in due.drain(..) {
            self.finish_release(subject, ReleaseCause::SentenceServed);
        }
        self.due = due;
    }

    // ---- host signals ----

    /// The subject connected. Reconciles any offline gap once and resumes
    /// a paused sentence.
    pub fn handle_connect(&mut self, subject: SubjectId, location: Location) {
        self.handle_connect_at(subject, location, Instant::now());
    }

    pub fn handle_connect_at(&mut self, subject: SubjectId, location: Location, now: Instant) {
        match self.store.handle_connect_at(subject, location, now) {
            ConnectOutcome::NotConfined => {}
            ConnectOutcome::Resumed => self.persist_record(subject),
            ConnectOutcome::ServedWhileOffline => {
                self.finish_release(subject, ReleaseCause::SentenceServed);
            }
        }
    }

    /// The subject disconnected at `location` (None when the host lost it).
    /// Freezes or pauses the sentence per the offline-time policy and
    /// persists the exact remaining value.
    pub fn handle_disconnect(&mut self, subject: SubjectId, location: Option<Location>) {
        self.handle_disconnect_at(subject, location, Instant::now());
    }

    pub fn handle_disconnect_at(
        &mut self,
        subject: SubjectId,
        location: Option<Location>,
        now: Instant,
    ) {
        let snapshot = self
            .store
            .handle_disconnect_at(subject, location, now)
            .map(ConfinementDocument::snapshot);
        if let Some(doc) = snapshot {
            if let Err(err) = self.gateway.save_confinement(subject, &doc) {
                warn!("queueing record write for {} failed: {}", subject, err);
            }
        }
    }

    /// The subject appeared in the world. An exempt subject is released on
    /// the spot; anyone else still serving is re-anchored at their jail.
    pub fn handle_spawn(&mut self, subject: SubjectId) {
        let exempt = self.host.has_exemption(subject);
        match self.store.spawn_outcome(subject, exempt) {
            SpawnOutcome::NotConfined => {}
            SpawnOutcome::Exempt => {
                info!("{} holds an exemption, releasing", subject);
                self.finish_release(subject, ReleaseCause::Exempt);
            }
            SpawnOutcome::Anchored => {
                let target = self
                    .store
                    .get(subject)
                    .and_then(|record| self.registry.lookup(&record.jail_name))
                    .map(|jail| jail.location.clone());
                if let Some(location) = target {
                    self.host.teleport(subject, &location);
                }
            }
        }
    }

    // ---- queries ----

    pub fn prisoner(&self, subject: SubjectId) -> Option<&ConfinementRecord> {
        self.store.get(subject)
    }

    pub fn prisoners(&self) -> impl Iterator<Item = &ConfinementRecord> {
        self.store.iter()
    }

    pub fn prisoner_count(&self) -> usize {
        self.store.len()
    }

    pub fn is_confined(&self, subject: SubjectId) -> bool {
        self.store.is_confined(subject)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn group_sync(&self) -> &GroupSynchronizer {
        &self.groups
    }

    pub fn config(&self) -> &StockadeConfig {
        &self.config
    }

    /// Number of queued writes that failed since open.
    pub fn write_failures(&self) -> u64 {
        self.gateway.write_failures()
    }

    // ---- persistence ----

    /// Queues a write for every jail and live record, then publishes
    /// [`Event::DataSaved`].
    pub fn save_all(&self) {
        for jail in self.registry.all() {
            if let Err(err) = self.gateway.save_jail(jail) {
                warn!("queueing jail '{}' write failed: {}", jail.name, err);
            }
        }

        let mut records = 0usize;
        for record in self.store.iter() {
            let doc = ConfinementDocument::snapshot(record);
            match self.gateway.save_confinement(record.subject, &doc) {
                Ok(()) => records += 1,
                Err(err) => {
                    warn!("queueing record write for {} failed: {}", record.subject, err);
                }
            }
        }

        self.events.publish(&Event::DataSaved { records });
    }

    /// Final save, event teardown and a bounded flush of queued writes.
    /// Workers must be stopped first; they hold the embedder's lock.
    pub async fn close(mut self) {
        self.save_all();
        self.events.clear();
        let grace = self.config.shutdown_grace;
        self.gateway.close(grace).await;
        info!("stockade closed");
    }

    // ---- internals ----

    /// Completes a release: the record is gone from the store before any
    /// side effect runs, so a re-entrant query during teleport sees the
    /// subject as free.
    fn finish_release(&mut self, subject: SubjectId, cause: ReleaseCause) {
        let Some(record) = self.store.take_record(subject) else {
            return;
        };

        if self.groups.is_active() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let groups = self.groups.clone();
                    let saved = record.saved_groups.clone();
                    handle.spawn(async move {
                        if let Err(err) = groups.restore_parent_groups(subject, &saved).await {
                            warn!("group restore for {} failed: {}", subject, err);
                        }
                    });
                }
                Err(_) => {
                    warn!(
                        "no async runtime to restore groups for {}; mirrored groups stay stale",
                        subject
                    );
                }
            }
        }

        if self.store.is_connected(subject) {
            if let Some(location) = self.release_target(&record) {
                self.host.teleport(subject, &location);
            }
        }

        if let Err(err) = self.gateway.delete_confinement(subject) {
            warn!("queueing record delete for {} failed: {}", subject, err);
        }

        info!("{} released from '{}' ({:?})", subject, record.jail_name, cause);
        self.events.publish(&Event::PrisonerReleased {
            subject,
            jail: record.jail_name,
            cause,
        });
    }

    /// Where a released subject goes: the jail's release point when set,
    /// else their last known location, else nowhere.
    fn release_target(&self, record: &ConfinementRecord) -> Option<Location> {
        if let Some(jail) = self.registry.lookup(&record.jail_name) {
            if let Some(release) = &jail.release_location {
                return Some(release.clone());
            }
        }
        record.last_known_location.clone()
    }

    fn persist_jail(&self, jail: &Jail) {
        if let Err(err) = self.gateway.save_jail(jail) {
            warn!("queueing jail '{}' write failed: {}", jail.name, err);
        }
    }

    fn persist_record(&self, subject: SubjectId) {
        if let Some(record) = self.store.get(subject) {
            let doc = ConfinementDocument::snapshot(record);
            if let Err(err) = self.gateway.save_confinement(subject, &doc) {
                warn!("queueing record write for {} failed: {}", subject, err);
            }
        }
    }
}
