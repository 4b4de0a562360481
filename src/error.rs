use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Malformed command: {0}")]
    MalformedCommand(String),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Database version is not latest: {found} != {expected}\nUse 'database upgrade' to upgrade the database")]
    VersionMismatch { found: String, expected: String },
    #[error("Another instance is operating on {0}")]
    MultipleInstances(String),
    #[error("Missing fields {} for table {table}", fields.join(", "))]
    MissingField { table: String, fields: Vec<String> },
    #[error("Entry with {column} {value:?} already exists in {table} table, but '--replace' is not set")]
    DuplicateEntry { table: String, column: String, value: String },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(String),
    #[error("CSV error: {0}")]
    Csv(String),
}

impl RepoError {
    /// Process exit status; every classified failure gets its own.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MalformedCommand(_) => 2,
            Self::UnknownCommand(_) => 3,
            Self::VersionMismatch { .. } => 4,
            Self::MultipleInstances(_) => 5,
            Self::MissingField { .. } => 6,
            Self::DuplicateEntry { .. } => 7,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, RepoError>;

// Helper conversions
impl From<rusqlite::Error> for RepoError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<config::ConfigError> for RepoError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self { Self::Json(e.to_string()) }
}
impl From<csv::Error> for RepoError {
    fn from(e: csv::Error) -> Self {
        let message = e.to_string();
        match e.into_kind() {
            csv::ErrorKind::Io(io) => Self::Io(io),
            _ => Self::Csv(message),
        }
    }
}
