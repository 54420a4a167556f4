// Core modules
pub mod binlog;
pub mod config;
pub mod error;
pub mod segment;
pub mod store;

// Re-export main types for convenience
pub use binlog::{ReplLog, ReplLogKey, ReplLogValue, RowOp};
pub use config::StorageConfig;
pub use error::StorageError;
pub use segment::SegmentMgr;
pub use store::{BackupInfo, BinlogCursor, Store, Txn};
