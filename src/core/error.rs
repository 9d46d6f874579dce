use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Jail '{0}' already exists")]
    NameConflict(String),

    #[error("Record '{0}' not found")]
    RecordNotFound(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Unsupported schema version {found} (current is {current})")]
    UnsupportedSchema { found: u32, current: u32 },

    #[error("Group backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::PersistenceFailure(err.to_string())
    }
}
