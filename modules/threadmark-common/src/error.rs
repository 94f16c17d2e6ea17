use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThreadmarkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
