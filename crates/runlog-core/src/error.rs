use std::path::PathBuf;

/// Failures reported by the recorder. Every variant is surfaced to the caller
/// at the operation that triggered it.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("cannot open store {}: {source}", path.display())]
    Connection {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("the connection to the store has been closed")]
    ClosedConnection,
    #[error("execution {0} has been closed")]
    ClosedExecution(i64),
    #[error("no execution is currently open")]
    NoCurrentExecution,
    #[error("invalid identifier `{name}`: {reason}")]
    InvalidIdentifier { name: String, reason: &'static str },
    #[error("field `{0}` supplied twice to the same builder")]
    DuplicateField(String),
    #[error("builder already finalized")]
    AlreadyFinalized,
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    pub(crate) fn invalid_identifier(name: &str, reason: &'static str) -> Self {
        StoreError::InvalidIdentifier {
            name: name.to_string(),
            reason,
        }
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
