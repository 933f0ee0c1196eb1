use cloudcron_core::TaskExit;
use cloudcron_dispatch::DispatchError;
use thiserror::Error;

/// Errors from parsing or evaluating a cron expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CronError {
    /// The string is not five whitespace separated fields, or a lone field token is malformed.
    #[error("'{expr}' is not a valid cron schedule string: {reason}")]
    Parse { expr: String, reason: String },

    /// A field token is none of `*`, `a-b`, `*/n` or an integer.
    #[error("invalid {field} field '{token}' in cron schedule '{expr}'")]
    InvalidField {
        expr: String,
        field: &'static str,
        token: String,
    },

    /// The search for a next run date hit the iteration cap.
    #[error("no run date for '{expr}' found within {iterations} steps")]
    NoMatch { expr: String, iterations: u32 },
}

/// Errors from the persistent schedule store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The store was closed or never connected.
    #[error("store connection is closed")]
    Disconnected,

    /// No entry with the given ID exists in the store.
    #[error("Crontab entry not found: {id}")]
    EntryNotFound { id: String },

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(#[from] CronError),

    #[error("Invalid stored timestamp '{value}'")]
    InvalidTimestamp { value: String },
}

impl StoreError {
    /// Errors a fresh connection is likely to cure.
    pub fn is_connection(&self) -> bool {
        use rusqlite::ErrorCode;
        match self {
            StoreError::Disconnected => true,
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Errors that end or reject a scheduler run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Another scheduler instance holds the single-instance marker.
    #[error("There already is a cron running ({holder})")]
    AlreadyRunning { holder: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Marker error: {0}")]
    Marker(#[from] std::io::Error),
}

impl SchedulerError {
    /// Exit status this error maps to when it ends the process.
    ///
    /// Conditions a restart cannot fix must not be restarted blindly.
    pub fn exit_code(&self) -> TaskExit {
        match self {
            SchedulerError::AlreadyRunning { .. } | SchedulerError::Config(_) => TaskExit::Fatal,
            SchedulerError::Dispatch(DispatchError::Unauthorized(_))
            | SchedulerError::Dispatch(DispatchError::Forbidden(_)) => TaskExit::Fatal,
            _ => TaskExit::Restart,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            SchedulerError::Config(_) => "CONFIG_ERROR",
            SchedulerError::Store(_) => "STORE_ERROR",
            SchedulerError::Dispatch(e) => e.code(),
            SchedulerError::Marker(_) => "MARKER_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
