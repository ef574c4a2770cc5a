use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenwatchError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl TokenwatchError {
    /// Configuration errors are the only fatal class: a worker that hits one
    /// exits instead of retrying on the next cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TokenwatchError::Config(_))
    }
}
