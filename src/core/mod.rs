pub mod error;
pub mod jail;
pub mod location;
pub mod record;

pub use error::{Error, Result};
pub use jail::{Jail, canonical_name};
pub use location::Location;
pub use record::{ConfinementRecord, ReleaseCause, SentenceStatus, SubjectId};
