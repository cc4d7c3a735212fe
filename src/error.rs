use thiserror::Error;

// Failures coming out of the record store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("corrupt row in slot {slot}: {reason}")]
    CorruptRow { slot: u64, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
