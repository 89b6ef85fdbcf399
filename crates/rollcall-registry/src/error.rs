use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("authentication failed: {0}")]
    Unauthorized(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("password hashing: {0}")]
    PasswordHash(String),
    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("registry directory {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}
