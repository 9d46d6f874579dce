use std::collections::BTreeMap;

use crate::core::{Error, Jail, Location, Result, canonical_name};

/// Owner of all named jails.
///
/// Keys are canonical lowercase names, kept in a `BTreeMap` so that "first
/// remaining jail" is deterministic when a delete has to pick a fallback.
#[derive(Debug, Default)]
pub struct JailRegistry {
    jails: BTreeMap<String, Jail>,
}

impl JailRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a jail loaded from storage, replacing any same-named entry.
    pub(crate) fn install(&mut self, mut jail: Jail) {
        jail.name = canonical_name(&jail.name);
        self.jails.insert(jail.name.clone(), jail);
    }

    /// Creates a jail. Names are unique case-insensitively.
    pub fn create(&mut self, name: &str, location: Location) -> Result<&Jail> {
        let canonical = canonical_name(name);
        if self.jails.contains_key(&canonical) {
            return Err(Error::NameConflict(canonical));
        }
        let jail = Jail {
            name: canonical.clone(),
            location,
            release_location: None,
        };
        Ok(self.jails.entry(canonical).or_insert(jail))
    }

    pub fn lookup(&self, name: &str) -> Option<&Jail> {
        self.jails.get(&canonical_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jails.contains_key(&canonical_name(name))
    }

    /// Moves the jail spawn. Confined subjects stay where they are.
    pub fn relocate(&mut self, name: &str, new_location: Location) -> Result<()> {
        let jail = self.jail_mut(name)?;
        jail.location = new_location;
        Ok(())
    }

    /// Sets or clears where released subjects are sent.
    pub fn set_release_location(
        &mut self,
        name: &str,
        release_location: Option<Location>,
    ) -> Result<()> {
        let jail = self.jail_mut(name)?;
        jail.release_location = release_location;
        Ok(())
    }

    /// Removes a jail, returning it together with the deterministic fallback
    /// (first remaining jail in name order) for records that referenced it.
    pub fn delete(&mut self, name: &str) -> Result<(Jail, Option<String>)> {
        let canonical = canonical_name(name);
        let removed = self
            .jails
            .remove(&canonical)
            .ok_or_else(|| Error::RecordNotFound(canonical))?;
        let fallback = self.jails.keys().next().cloned();
        Ok((removed, fallback))
    }

    /// Read-only view of every jail, in canonical name order.
    pub fn all(&self) -> impl Iterator<Item = &Jail> {
        self.jails.values()
    }

    pub fn len(&self) -> usize {
        self.jails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jails.is_empty()
    }

    fn jail_mut(&mut self, name: &str) -> Result<&mut Jail> {
        let canonical = canonical_name(name);
        self.jails
            .get_mut(&canonical)
            .ok_or_else(|| Error::RecordNotFound(canonical))
    }
}
