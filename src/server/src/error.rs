use storage::StorageError;

/// Error type for server configuration errors
#[derive(Debug)]
pub enum ServerError {
    InvalidPort(String),
    IoError(std::io::Error),
    StorageError(StorageError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::InvalidPort(msg) => write!(f, "Invalid port: {}", msg),
            ServerError::IoError(e) => write!(f, "IO error: {}", e),
            ServerError::StorageError(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::IoError(err)
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        ServerError::StorageError(err)
    }
}
