// Core modules
pub mod batch;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod manager;
pub mod pool;
pub mod stats;

mod fullsync;

// Re-export main types for convenience
pub use batch::{read_binlog_batch, BinlogBatch, SUGGEST_BATCH, SUGGEST_BYTES};
pub use client::PeerClient;
pub use config::ReplConfig;
pub use error::ReplError;
pub use manager::{ReplManager, ReplicaInfo};
pub use pool::WorkerPool;
pub use stats::ReplMetrics;
