use serde::{Deserialize, Serialize};

use super::location::Location;

/// Lowercases a jail name. All registry keys and every `jail_name` stored on
/// a confinement record use the canonical form.
pub fn canonical_name(name: &str) -> String {
    name.to_lowercase()
}

/// A named confinement site. Names are unique case-insensitively; the
/// registry canonicalizes them to lowercase on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Jail {
    pub name: String,
    pub location: Location,
    /// Where released subjects are sent. Falls back to the subject's last
    /// known location when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_location: Option<Location>,
}

impl Jail {
    pub fn new(name: &str, location: Location) -> Self {
        Self {
            name: canonical_name(name),
            location,
            release_location: None,
        }
    }

    pub fn with_release_location(mut self, location: Location) -> Self {
        self.release_location = Some(location);
        self
    }
}
