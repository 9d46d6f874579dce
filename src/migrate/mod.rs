//! Schema migration for durable confinement documents.
//!
//! Historical versions of this system rewrote their on-disk prisoner format
//! several times. Every document is normalized through a chain of single-step
//! upgrades before it enters memory, so the rest of the crate only ever sees
//! the current shape.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::{Error, Result};

/// Version written by every new document.
pub const CURRENT_SCHEMA_VERSION: u32 = 4;

/// Field carrying the declared version inside a confinement document.
pub const SCHEMA_VERSION_FIELD: &str = "schemaVersion";

/// Documents predating the version field are treated as this version.
pub const fn oldest_schema_version() -> u32 {
    1
}

/// A pure upgrade step over the raw document object.
pub type StepFn = Arc<dyn Fn(&mut Map<String, Value>) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct MigrationStep {
    pub from_version: u32,
    pub to_version: u32,
    run: StepFn,
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from_version", &self.from_version)
            .field("to_version", &self.to_version)
            .finish()
    }
}

impl MigrationStep {
    pub fn new<F>(from_version: u32, to_version: u32, run: F) -> Self
    where
        F: Fn(&mut Map<String, Value>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            from_version,
            to_version,
            run: Arc::new(run),
        }
    }
}

/// Validated chain of upgrade steps, each covering exactly one
/// `(version, version + 1)` pair.
#[derive(Debug, Clone)]
pub struct SchemaMigrator {
    current_version: u32,
    steps: Vec<MigrationStep>,
}

impl SchemaMigrator {
    pub fn new(current_version: u32) -> Self {
        Self {
            current_version,
            steps: Vec::new(),
        }
    }

    /// The chain for confinement documents, oldest format first.
    pub fn confinement_chain() -> Self {
        let mut plan = Self::new(CURRENT_SCHEMA_VERSION);
        plan.steps.push(MigrationStep::new(1, 2, upgrade_v1_to_v2));
        plan.steps.push(MigrationStep::new(2, 3, upgrade_v2_to_v3));
        plan.steps.push(MigrationStep::new(3, 4, upgrade_v3_to_v4));
        plan
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Appends a step, checking only its shape; [`SchemaMigrator::validate`]
    /// checks coverage once the chain is complete.
    pub fn add_step<F>(&mut self, from_version: u32, to_version: u32, run: F) -> Result<()>
    where
        F: Fn(&mut Map<String, Value>) -> Result<()> + Send + Sync + 'static,
    {
        self.steps.push(MigrationStep::new(from_version, to_version, run));
        self.validate_steps().map(|_| ())
    }

    /// Checks the complete chain: per-step shape plus full coverage, one
    /// step from every version between the oldest and the current. Runs at
    /// startup, before any document is loaded.
    pub fn validate(&self) -> Result<()> {
        let seen_from = self.validate_steps()?;
        for version in oldest_schema_version()..self.current_version {
            if !seen_from.contains(&version) {
                return Err(Error::PersistenceFailure(format!(
                    "incomplete migration chain: no step from version {} toward {}",
                    version, self.current_version
                )));
            }
        }
        Ok(())
    }

    fn validate_steps(&self) -> Result<HashSet<u32>> {
        if self.current_version == 0 {
            return Err(Error::PersistenceFailure(
                "schema version must be >= 1".to_string(),
            ));
        }

        let mut seen_from = HashSet::<u32>::new();
        for step in &self.steps {
            if step.from_version == 0 {
                return Err(Error::PersistenceFailure(
                    "migration 'from' version must be >= 1".to_string(),
                ));
            }
            if step.to_version != step.from_version + 1 {
                return Err(Error::PersistenceFailure(format!(
                    "migration step {} -> {} must target the next version",
                    step.from_version, step.to_version
                )));
            }
            if step.to_version > self.current_version {
                return Err(Error::PersistenceFailure(format!(
                    "migration step {} -> {} exceeds current schema version {}",
                    step.from_version, step.to_version, self.current_version
                )));
            }
            if !seen_from.insert(step.from_version) {
                return Err(Error::PersistenceFailure(format!(
                    "duplicate migration step starting at version {}",
                    step.from_version
                )));
            }
        }

        Ok(seen_from)
    }

    /// Reads the declared version of a raw document; absent means oldest.
    pub fn declared_version(doc: &Value) -> Result<u32> {
        let Some(obj) = doc.as_object() else {
            return Err(Error::CorruptRecord(
                "confinement document is not a JSON object".to_string(),
            ));
        };

        match obj.get(SCHEMA_VERSION_FIELD) {
            None => Ok(oldest_schema_version()),
            Some(value) => value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v >= 1)
                .ok_or_else(|| {
                    Error::CorruptRecord(format!("invalid {}: {}", SCHEMA_VERSION_FIELD, value))
                }),
        }
    }

    /// Upgrades `doc` in place to the current version, stamping the version
    /// after every step.
    ///
    /// A document already at the current version is returned untouched; one
    /// declaring a version newer than this build understands is rejected
    /// with [`Error::UnsupportedSchema`] rather than silently truncated.
    pub fn migrate_to_current(&self, doc: &mut Value) -> Result<()> {
        let declared = Self::declared_version(doc)?;
        if declared == self.current_version {
            return Ok(());
        }
        if declared > self.current_version {
            return Err(Error::UnsupportedSchema {
                found: declared,
                current: self.current_version,
            });
        }

        let chain = self.resolve_chain(declared)?;
        let Some(obj) = doc.as_object_mut() else {
            return Err(Error::CorruptRecord(
                "confinement document is not a JSON object".to_string(),
            ));
        };

        for step in chain {
            (step.run)(obj)?;
            obj.insert(
                SCHEMA_VERSION_FIELD.to_string(),
                Value::from(step.to_version),
            );
        }

        Ok(())
    }

    fn resolve_chain(&self, from_version: u32) -> Result<Vec<&MigrationStep>> {
        if from_version == self.current_version {
            return Ok(Vec::new());
        }

        let mut by_from = HashMap::<u32, &MigrationStep>::new();
        for step in &self.steps {
            by_from.insert(step.from_version, step);
        }

        let mut cursor = from_version;
        let mut chain = Vec::new();
        while cursor < self.current_version {
            let step = by_from.get(&cursor).copied().ok_or_else(|| {
                Error::PersistenceFailure(format!(
                    "missing migration step from version {} toward {}",
                    cursor, self.current_version
                ))
            })?;
            chain.push(step);
            cursor = step.to_version;
        }

        Ok(chain)
    }
}

/// v1 used flat all-lowercase keys and a `jailed` flag meaning "not yet
/// released". Renames everything to its current name and inverts the flag.
fn upgrade_v1_to_v2(doc: &mut Map<String, Value>) -> Result<()> {
    rename_field(doc, "jailname", "jailName");
    rename_field(doc, "secondsleft", "remainingSeconds");
    rename_field(doc, "jailedby", "confinedBy");
    rename_field(doc, "groups", "savedGroups");
    rename_field(doc, "lastlocationworld", "lastLocationWorld");
    rename_field(doc, "lastlocationx", "lastLocationX");
    rename_field(doc, "lastlocationy", "lastLocationY");
    rename_field(doc, "lastlocationz", "lastLocationZ");
    rename_field(doc, "lastlocationyaw", "lastLocationYaw");
    rename_field(doc, "lastlocationpitch", "lastLocationPitch");

    let jailed = doc.remove("jailed").and_then(|v| v.as_bool()).unwrap_or(true);
    doc.insert("released".to_string(), Value::Bool(!jailed));
    Ok(())
}

/// v2 carried a `released` flag alongside the remaining time. A released
/// document means a served sentence, so the flag collapses into
/// `remainingSeconds = 0`; the explicit `status` field appears here.
fn upgrade_v2_to_v3(doc: &mut Map<String, Value>) -> Result<()> {
    let released = doc
        .remove("released")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if released {
        doc.insert("remainingSeconds".to_string(), Value::from(0u64));
    }
    if !doc.contains_key("status") {
        doc.insert("status".to_string(), Value::from("paused"));
    }
    Ok(())
}

/// v3 still stored the last known location as six flat fields; v4 wraps them
/// into a structured object and guarantees `savedGroups` is present.
fn upgrade_v3_to_v4(doc: &mut Map<String, Value>) -> Result<()> {
    let world = doc
        .remove("lastLocationWorld")
        .and_then(|v| v.as_str().map(str::to_owned));
    let x = take_number(doc, "lastLocationX");
    let y = take_number(doc, "lastLocationY");
    let z = take_number(doc, "lastLocationZ");
    let yaw = take_number(doc, "lastLocationYaw");
    let pitch = take_number(doc, "lastLocationPitch");

    if let (Some(world), Some(x), Some(y), Some(z)) = (world, x, y, z) {
        let mut location = Map::new();
        location.insert("world".to_string(), Value::from(world));
        location.insert("x".to_string(), Value::from(x));
        location.insert("y".to_string(), Value::from(y));
        location.insert("z".to_string(), Value::from(z));
        location.insert("yaw".to_string(), Value::from(yaw.unwrap_or(0.0)));
        location.insert("pitch".to_string(), Value::from(pitch.unwrap_or(0.0)));
        doc.insert("lastKnownLocation".to_string(), Value::Object(location));
    }

    if !doc.contains_key("savedGroups") {
        doc.insert("savedGroups".to_string(), Value::Array(Vec::new()));
    }
    Ok(())
}

fn rename_field(doc: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = doc.remove(from) {
        doc.insert(to.to_string(), value);
    }
}

fn take_number(doc: &mut Map<String, Value>, key: &str) -> Option<f64> {
    doc.remove(key).and_then(|v| v.as_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn current_version_passes_through_untouched() {
        let migrator = SchemaMigrator::confinement_chain();
        let original = json!({
            "schemaVersion": CURRENT_SCHEMA_VERSION,
            "jailName": "block-d",
            "remainingSeconds": 120,
            "status": "paused",
            "confinedBy": "warden",
            "savedGroups": ["default"],
        });
        let mut doc = original.clone();
        migrator.migrate_to_current(&mut doc).unwrap();
        assert_eq!(doc, original);
    }

    #[test]
    fn future_version_is_rejected() {
        let migrator = SchemaMigrator::confinement_chain();
        let mut doc = json!({ "schemaVersion": CURRENT_SCHEMA_VERSION + 1 });
        let err = migrator.migrate_to_current(&mut doc).unwrap_err();
        match err {
            Error::UnsupportedSchema { found, current } => {
                assert_eq!(found, CURRENT_SCHEMA_VERSION + 1);
                assert_eq!(current, CURRENT_SCHEMA_VERSION);
            }
            other => panic!("expected UnsupportedSchema, got {other}"),
        }
    }

    #[test]
    fn missing_version_means_oldest() {
        let doc = json!({ "jailname": "block-d" });
        assert_eq!(
            SchemaMigrator::declared_version(&doc).unwrap(),
            oldest_schema_version()
        );
    }

    #[test]
    fn v1_chain_renames_and_inverts_jailed_flag() {
        let migrator = SchemaMigrator::confinement_chain();
        let mut doc = json!({
            "jailname": "block-d",
            "secondsleft": 90,
            "jailedby": "warden",
            "jailed": true,
            "groups": ["default", "vip"],
            "lastlocationworld": "world0",
            "lastlocationx": 1.5,
            "lastlocationy": 64.0,
            "lastlocationz": -3.0,
        });
        migrator.migrate_to_current(&mut doc).unwrap();

        assert_eq!(doc["schemaVersion"], CURRENT_SCHEMA_VERSION);
        assert_eq!(doc["jailName"], "block-d");
        // still serving: the inverted flag must not zero the sentence
        assert_eq!(doc["remainingSeconds"], 90);
        assert_eq!(doc["status"], "paused");
        assert_eq!(doc["confinedBy"], "warden");
        assert_eq!(doc["savedGroups"], json!(["default", "vip"]));
        assert_eq!(doc["lastKnownLocation"]["world"], "world0");
        assert_eq!(doc["lastKnownLocation"]["yaw"], 0.0);
        assert!(doc.get("jailed").is_none());
        assert!(doc.get("released").is_none());
    }

    #[test]
    fn v1_released_document_serves_out_the_sentence() {
        let migrator = SchemaMigrator::confinement_chain();
        let mut doc = json!({
            "jailname": "block-d",
            "secondsleft": 90,
            "jailedby": "warden",
            "jailed": false,
        });
        migrator.migrate_to_current(&mut doc).unwrap();
        assert_eq!(doc["remainingSeconds"], 0);
    }

    #[test]
    fn v3_document_gets_structured_location() {
        let migrator = SchemaMigrator::confinement_chain();
        let mut doc = json!({
            "schemaVersion": 3,
            "jailName": "block-d",
            "remainingSeconds": 45,
            "status": "running",
            "confinedBy": "warden",
            "lastLocationWorld": "nether",
            "lastLocationX": 10.0,
            "lastLocationY": 70.0,
            "lastLocationZ": 10.0,
            "lastLocationYaw": 90.0,
        });
        migrator.migrate_to_current(&mut doc).unwrap();

        assert_eq!(doc["schemaVersion"], CURRENT_SCHEMA_VERSION);
        assert_eq!(doc["lastKnownLocation"]["world"], "nether");
        assert_eq!(doc["lastKnownLocation"]["yaw"], 90.0);
        assert_eq!(doc["savedGroups"], json!([]));
        assert!(doc.get("lastLocationWorld").is_none());
    }

    #[test]
    fn validate_rejects_version_gaps_and_duplicates() {
        let mut plan = SchemaMigrator::new(3);
        plan.add_step(1, 2, |_| Ok(())).unwrap();
        assert!(plan.add_step(1, 2, |_| Ok(())).is_err());

        let mut skipping = SchemaMigrator::new(3);
        assert!(skipping.add_step(1, 3, |_| Ok(())).is_err());
    }

    #[test]
    fn validate_requires_full_coverage_to_current() {
        let mut plan = SchemaMigrator::new(3);
        plan.add_step(1, 2, |_| Ok(())).unwrap();
        // step 2 -> 3 still missing
        assert!(matches!(plan.validate(), Err(Error::PersistenceFailure(_))));
        plan.add_step(2, 3, |_| Ok(())).unwrap();
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn missing_chain_step_is_reported() {
        let mut plan = SchemaMigrator::new(3);
        plan.add_step(2, 3, |_| Ok(())).unwrap();
        let mut doc = json!({ "schemaVersion": 1 });
        assert!(matches!(
            plan.migrate_to_current(&mut doc),
            Err(Error::PersistenceFailure(_))
        ));
    }
}
