use std::io;
use storage::StorageError;

/// Error type for replication operations
#[derive(Debug)]
pub enum ReplError {
    /// Malformed handshake arguments
    Parse(String),
    /// Worker pool saturated
    AdmissionFull,
    /// Store id out of range or instance missing
    InvalidStore,
    /// Requested binlog position precedes the retained log
    StaleOffset { first: u64, requested: u64 },
    /// Backup could not be taken for a full sync
    Backup(String),
    /// Binlog cursor failed with a non-exhaust error
    Cursor(StorageError),
    /// Socket failure or timeout
    Network(io::Error),
    /// Peer replied something other than the expected status line
    Protocol(String),
}

// Display doubles as the `-ERR` reply text for the kinds a slave can
// observe, so the wording here is part of the wire protocol.
impl std::fmt::Display for ReplError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplError::Parse(msg) => write!(f, "parse opts failed:{}", msg),
            ReplError::AdmissionFull => write!(f, "workerpool full"),
            ReplError::InvalidStore => write!(f, "invalid storeId"),
            ReplError::StaleOffset { .. } => write!(f, "invalid binlogPos"),
            ReplError::Backup(msg) => write!(f, "backup failed:{}", msg),
            ReplError::Cursor(e) => write!(f, "binlog cursor error: {}", e),
            ReplError::Network(e) => write!(f, "network error: {}", e),
            ReplError::Protocol(line) => write!(f, "bad return string: {:?}", line),
        }
    }
}

impl std::error::Error for ReplError {}

impl From<io::Error> for ReplError {
    fn from(err: io::Error) -> Self {
        ReplError::Network(err)
    }
}

impl From<StorageError> for ReplError {
    fn from(err: StorageError) -> Self {
        ReplError::Cursor(err)
    }
}
