use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::core::{ConfinementRecord, Location, SentenceStatus, SubjectId};

/// What a connect notification did to the subject's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// No active record for this subject.
    NotConfined,
    /// The record was updated and the sentence continues.
    Resumed,
    /// The offline gap consumed the whole remaining sentence; the caller
    /// runs the release flow.
    ServedWhileOffline,
}

/// What to do when a confined subject is observed in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    NotConfined,
    /// Still serving: re-anchor the subject at the jail spawn.
    Anchored,
    /// Holds an exemption; the caller runs the release flow.
    Exempt,
}

/// Exclusive owner of all live confinement records.
///
/// Pure state machine: transitions mutate the map and report what happened;
/// persistence, group sync, teleports and events are orchestrated by the
/// facade. All mutation runs on the single logical writer thread, so the
/// maps need no locks. Clock-sensitive operations take an explicit `now` so
/// tests can drive synthetic time.
pub struct PrisonerStore {
    records: HashMap<SubjectId, ConfinementRecord>,
    connected: HashSet<SubjectId>,
    count_offline_time: bool,
    tick_interval: Duration,
}

impl PrisonerStore {
    pub fn new(count_offline_time: bool, tick_interval: Duration) -> Self {
        Self {
            records: HashMap::new(),
            connected: HashSet::new(),
            count_offline_time,
            tick_interval,
        }
    }

    pub fn get(&self, subject: SubjectId) -> Option<&ConfinementRecord> {
        self.records.get(&subject)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfinementRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_confined(&self, subject: SubjectId) -> bool {
        self.records.contains_key(&subject)
    }

    pub fn is_connected(&self, subject: SubjectId) -> bool {
        self.connected.contains(&subject)
    }

    /// Number of records referencing a jail.
    pub fn count_referencing(&self, jail_name: &str) -> usize {
        self.records
            .values()
            .filter(|record| record.jail_name == jail_name)
            .count()
    }

    /// Installs a record rehydrated from storage. Nobody is connected at
    /// load time: a `running` document freezes awaiting the reconnect
    /// reconciliation when offline time counts, and pauses otherwise.
    pub(crate) fn insert_loaded_at(&mut self, mut record: ConfinementRecord, now: Instant) {
        record.checkpoint = None;
        record.frozen_at = None;
        if record.status == SentenceStatus::Running {
            if self.count_offline_time {
                record.frozen_at = Some(now);
            } else {
                record.status = SentenceStatus::Paused;
            }
        }
        self.records.insert(record.subject, record);
    }

    /// Creates or replaces the subject's sentence.
    ///
    /// The record starts `Running` only when the subject is connected and
    /// not exempt. Re-confining replaces jail, sentence and attribution but
    /// keeps the original group capture and last known location.
    pub(crate) fn confine_at(
        &mut self,
        subject: SubjectId,
        jail_name: String,
        sentence: Duration,
        confined_by: String,
        exempt: bool,
        now: Instant,
    ) -> &mut ConfinementRecord {
        let active = self.connected.contains(&subject) && !exempt;

        let record = self
            .records
            .entry(subject)
            .or_insert_with(|| ConfinementRecord {
                subject,
                jail_name: jail_name.clone(),
                remaining: sentence,
                status: SentenceStatus::Paused,
                last_known_location: None,
                confined_by: confined_by.clone(),
                saved_groups: Vec::new(),
                checkpoint: None,
                frozen_at: None,
            });

        record.jail_name = jail_name;
        record.remaining = sentence;
        record.confined_by = confined_by;
        record.frozen_at = None;
        if active {
            record.status = SentenceStatus::Running;
            record.checkpoint = Some(now);
        } else {
            record.status = SentenceStatus::Paused;
            record.checkpoint = None;
        }
        record
    }

    /// Advances every ticking record and collects subjects whose sentence
    /// just ran out into `due`.
    ///
    /// Elapsed time per record is clamped to one tick interval, so scheduler
    /// jitter or a lag spike never burns more than one interval of sentence
    /// time. Skips paused records, frozen records and disconnected subjects.
    pub(crate) fn tick_at(&mut self, now: Instant, due: &mut Vec<SubjectId>) {
        for record in self.records.values_mut() {
            if record.status != SentenceStatus::Running || record.frozen_at.is_some() {
                continue;
            }
            if !self.connected.contains(&record.subject) {
                continue;
            }
            let Some(checkpoint) = record.checkpoint else {
                record.checkpoint = Some(now);
                continue;
            };
            let elapsed = now
                .saturating_duration_since(checkpoint)
                .min(self.tick_interval);
            record.remaining = record.remaining.saturating_sub(elapsed);
            record.checkpoint = Some(now);
            if record.remaining.is_zero() {
                due.push(record.subject);
            }
        }
    }

    /// Marks the subject connected and reconciles the offline gap.
    ///
    /// A frozen record has the gap since the freeze subtracted exactly once;
    /// taking the marker guarantees a duplicate connect cannot subtract
    /// again. A paused record resumes with a fresh checkpoint and an
    /// unchanged remaining value.
    pub(crate) fn handle_connect_at(
        &mut self,
        subject: SubjectId,
        location: Location,
        now: Instant,
    ) -> ConnectOutcome {
        self.connected.insert(subject);
        let Some(record) = self.records.get_mut(&subject) else {
            return ConnectOutcome::NotConfined;
        };
        record.last_known_location = Some(location);

        if let Some(frozen_at) = record.frozen_at.take() {
            let offline = now.saturating_duration_since(frozen_at);
            record.remaining = record.remaining.saturating_sub(offline);
            if record.remaining.is_zero() {
                return ConnectOutcome::ServedWhileOffline;
            }
        }

        match record.status {
            SentenceStatus::Paused => {
                record.status = SentenceStatus::Running;
                record.checkpoint = Some(now);
            }
            SentenceStatus::Running => {
                if record.checkpoint.is_none() {
                    record.checkpoint = Some(now);
                }
            }
            SentenceStatus::Released => {}
        }
        ConnectOutcome::Resumed
    }

    /// Marks the subject disconnected.
    ///
    /// When offline time counts, the record stays `Running` with the clock
    /// frozen; no ticks happen while disconnected and the gap is settled on
    /// reconnect. Otherwise the record pauses with its exact remaining
    /// value. Returns the record so the caller can persist a snapshot.
    pub(crate) fn handle_disconnect_at(
        &mut self,
        subject: SubjectId,
        location: Option<Location>,
        now: Instant,
    ) -> Option<&ConfinementRecord> {
        self.connected.remove(&subject);
        let record = self.records.get_mut(&subject)?;
        if let Some(location) = location {
            record.last_known_location = Some(location);
        }
        if record.status == SentenceStatus::Running {
            if self.count_offline_time {
                if record.frozen_at.is_none() {
                    record.frozen_at = Some(now);
                }
            } else {
                record.status = SentenceStatus::Paused;
            }
            record.checkpoint = None;
        }
        Some(record)
    }

    pub(crate) fn spawn_outcome(&self, subject: SubjectId, exempt: bool) -> SpawnOutcome {
        if !self.records.contains_key(&subject) {
            SpawnOutcome::NotConfined
        } else if exempt {
            SpawnOutcome::Exempt
        } else {
            SpawnOutcome::Anchored
        }
    }

    /// Removes the record as part of a release.
    pub(crate) fn take_record(&mut self, subject: SubjectId) -> Option<ConfinementRecord> {
        self.records.remove(&subject)
    }

    /// Points every record referencing `from` at `to`, collecting the
    /// affected subjects for re-persisting.
    pub(crate) fn reassign_jail(&mut self, from: &str, to: &str, affected: &mut Vec<SubjectId>) {
        for record in self.records.values_mut() {
            if record.jail_name == from {
                record.jail_name = to.to_string();
                affected.push(record.subject);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_secs(1);

    fn subject() -> SubjectId {
        SubjectId::random()
    }

    fn spawn_point() -> Location {
        Location::new("world0", 0.0, 64.0, 0.0)
    }

    fn connected_store(subject: SubjectId, now: Instant) -> PrisonerStore {
        let mut store = PrisonerStore::new(false, TICK);
        store.handle_connect_at(subject, spawn_point(), now);
        store
    }

    #[test]
    fn remaining_is_non_increasing_across_ticks() {
        let t0 = Instant::now();
        let subject = subject();
        let mut store = connected_store(subject, t0);
        store.confine_at(
            subject,
            "block".to_string(),
            Duration::from_secs(10),
            "warden".to_string(),
            false,
            t0,
        );

        let mut due = Vec::new();
        let mut previous = Duration::from_secs(10);
        for i in 1..=9 {
            store.tick_at(t0 + TICK * i, &mut due);
            let remaining = store.get(subject).unwrap().remaining;
            assert!(remaining <= previous);
            previous = remaining;
        }
        assert!(due.is_empty());
        assert_eq!(previous, Duration::from_secs(1));

        store.tick_at(t0 + TICK * 10, &mut due);
        assert_eq!(due, vec![subject]);
        assert!(store.get(subject).unwrap().remaining.is_zero());
    }

    #[test]
    fn elapsed_is_clamped_to_one_interval() {
        let t0 = Instant::now();
        let subject = subject();
        let mut store = connected_store(subject, t0);
        store.confine_at(
            subject,
            "block".to_string(),
            Duration::from_secs(60),
            "warden".to_string(),
            false,
            t0,
        );

        // a 30 second lag spike still burns only one interval
        let mut due = Vec::new();
        store.tick_at(t0 + Duration::from_secs(30), &mut due);
        assert_eq!(
            store.get(subject).unwrap().remaining,
            Duration::from_secs(59)
        );
    }

    #[test]
    fn paused_records_ignore_the_passage_of_time() {
        let t0 = Instant::now();
        let subject = subject();
        let mut store = PrisonerStore::new(false, TICK);
        store.confine_at(
            subject,
            "block".to_string(),
            Duration::from_secs(60),
            "warden".to_string(),
            false,
            t0,
        );
        assert!(store.get(subject).unwrap().is_paused());

        let mut due = Vec::new();
        store.tick_at(t0 + Duration::from_secs(3600), &mut due);
        assert_eq!(
            store.get(subject).unwrap().remaining,
            Duration::from_secs(60)
        );
        assert!(due.is_empty());
    }

    #[test]
    fn exempt_subject_is_confined_paused_even_while_connected() {
        let t0 = Instant::now();
        let subject = subject();
        let mut store = connected_store(subject, t0);
        let record = store.confine_at(
            subject,
            "block".to_string(),
            Duration::from_secs(60),
            "warden".to_string(),
            true,
            t0,
        );
        assert_eq!(record.status, SentenceStatus::Paused);
    }

    #[test]
    fn disconnect_pauses_when_offline_time_does_not_count() {
        let t0 = Instant::now();
        let subject = subject();
        let mut store = connected_store(subject, t0);
        store.confine_at(
            subject,
            "block".to_string(),
            Duration::from_secs(3600),
            "warden".to_string(),
            false,
            t0,
        );

        store.handle_disconnect_at(subject, None, t0 + TICK);
        let record = store.get(subject).unwrap();
        assert!(record.is_paused());
        assert!(!record.is_frozen());

        // an hour later the sentence is untouched and resumes on reconnect
        let outcome = store.handle_connect_at(subject, spawn_point(), t0 + Duration::from_secs(3600));
        assert_eq!(outcome, ConnectOutcome::Resumed);
        let record = store.get(subject).unwrap();
        assert!(record.is_running());
        assert_eq!(record.remaining, Duration::from_secs(3600));
    }

    #[test]
    fn offline_gap_is_subtracted_once_when_it_counts() {
        let t0 = Instant::now();
        let subject = subject();
        let mut store = PrisonerStore::new(true, TICK);
        store.handle_connect_at(subject, spawn_point(), t0);
        store.confine_at(
            subject,
            "block".to_string(),
            Duration::from_secs(3600),
            "warden".to_string(),
            false,
            t0,
        );

        store.handle_disconnect_at(subject, None, t0);
        let record = store.get(subject).unwrap();
        assert!(record.is_running());
        assert!(record.is_frozen());

        let outcome =
            store.handle_connect_at(subject, spawn_point(), t0 + Duration::from_secs(600));
        assert_eq!(outcome, ConnectOutcome::Resumed);
        let record = store.get(subject).unwrap();
        assert_eq!(record.remaining, Duration::from_secs(3000));
        assert!(!record.is_frozen());

        // a duplicate connect must not subtract the gap again
        let outcome =
            store.handle_connect_at(subject, spawn_point(), t0 + Duration::from_secs(1200));
        assert_eq!(outcome, ConnectOutcome::Resumed);
        assert_eq!(
            store.get(subject).unwrap().remaining,
            Duration::from_secs(3000)
        );
    }

    #[test]
    fn sentence_served_while_offline_releases_on_reconnect() {
        let t0 = Instant::now();
        let subject = subject();
        let mut store = PrisonerStore::new(true, TICK);
        store.handle_connect_at(subject, spawn_point(), t0);
        store.confine_at(
            subject,
            "block".to_string(),
            Duration::from_secs(3600),
            "warden".to_string(),
            false,
            t0,
        );
        store.handle_disconnect_at(subject, None, t0);

        let outcome =
            store.handle_connect_at(subject, spawn_point(), t0 + Duration::from_secs(3600));
        assert_eq!(outcome, ConnectOutcome::ServedWhileOffline);
    }

    #[test]
    fn frozen_records_do_not_tick() {
        let t0 = Instant::now();
        let subject = subject();
        let mut store = PrisonerStore::new(true, TICK);
        store.handle_connect_at(subject, spawn_point(), t0);
        store.confine_at(
            subject,
            "block".to_string(),
            Duration::from_secs(60),
            "warden".to_string(),
            false,
            t0,
        );
        store.handle_disconnect_at(subject, None, t0);

        let mut due = Vec::new();
        store.tick_at(t0 + TICK, &mut due);
        assert_eq!(
            store.get(subject).unwrap().remaining,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn reconfine_replaces_sentence_but_keeps_capture() {
        let t0 = Instant::now();
        let subject = subject();
        let mut store = connected_store(subject, t0);
        let record = store.confine_at(
            subject,
            "block".to_string(),
            Duration::from_secs(60),
            "warden".to_string(),
            false,
            t0,
        );
        record.saved_groups = vec!["default".to_string()];
        record.last_known_location = Some(spawn_point());

        let record = store.confine_at(
            subject,
            "cell".to_string(),
            Duration::from_secs(120),
            "sheriff".to_string(),
            false,
            t0 + TICK,
        );
        assert_eq!(record.jail_name, "cell");
        assert_eq!(record.remaining, Duration::from_secs(120));
        assert_eq!(record.confined_by, "sheriff");
        assert_eq!(record.saved_groups, vec!["default".to_string()]);
        assert!(record.last_known_location.is_some());
    }

    #[test]
    fn loaded_running_record_normalizes_by_policy() {
        let t0 = Instant::now();
        let subject = subject();
        let record = ConfinementRecord {
            subject,
            jail_name: "block".to_string(),
            remaining: Duration::from_secs(60),
            status: SentenceStatus::Running,
            last_known_location: None,
            confined_by: "warden".to_string(),
            saved_groups: Vec::new(),
            checkpoint: None,
            frozen_at: None,
        };

        let mut pausing = PrisonerStore::new(false, TICK);
        pausing.insert_loaded_at(record.clone(), t0);
        assert!(pausing.get(subject).unwrap().is_paused());

        let mut freezing = PrisonerStore::new(true, TICK);
        freezing.insert_loaded_at(record, t0);
        let loaded = freezing.get(subject).unwrap();
        assert!(loaded.is_running());
        assert!(loaded.is_frozen());
    }

    #[test]
    fn reassign_jail_moves_only_matching_records() {
        let t0 = Instant::now();
        let first = subject();
        let second = subject();
        let mut store = PrisonerStore::new(false, TICK);
        store.confine_at(
            first,
            "a".to_string(),
            Duration::from_secs(60),
            "warden".to_string(),
            false,
            t0,
        );
        store.confine_at(
            second,
            "b".to_string(),
            Duration::from_secs(60),
            "warden".to_string(),
            false,
            t0,
        );

        let mut affected = Vec::new();
        store.reassign_jail("a", "b", &mut affected);
        assert_eq!(affected, vec![first]);
        assert_eq!(store.get(first).unwrap().jail_name, "b");
        assert_eq!(store.get(second).unwrap().jail_name, "b");
        assert_eq!(store.count_referencing("b"), 2);
    }
}
