use std::io;

/// Error type for storage operations
#[derive(Debug)]
pub enum StorageError {
    Io(io::Error),
    /// A binlog record failed validation (bad magic, version or CRC)
    Corrupt(String),
    /// Binlog cursor has no more records
    Exhausted,
    /// A backup is already in progress for this store
    BackupActive,
    /// The store has been stopped
    NotRunning,
    /// A transaction must carry at least one row
    EmptyBatch,
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "IO error: {}", e),
            StorageError::Corrupt(msg) => write!(f, "corrupt binlog: {}", msg),
            StorageError::Exhausted => write!(f, "binlog cursor exhausted"),
            StorageError::BackupActive => write!(f, "backup already in progress"),
            StorageError::NotRunning => write!(f, "store is not running"),
            StorageError::EmptyBatch => write!(f, "empty transaction"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
