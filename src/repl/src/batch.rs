use log::error;
use storage::{ReplLog, StorageError, Store};

use crate::error::ReplError;

/// Row-count threshold after which a batch closes at the next
/// transaction boundary
pub const SUGGEST_BATCH: usize = 64;
/// Payload-byte threshold after which a batch closes at the next
/// transaction boundary
pub const SUGGEST_BYTES: usize = 16 * 1024 * 1024;

/// One transaction-aligned window of binlog rows
#[derive(Debug)]
pub struct BinlogBatch {
    pub rows: Vec<ReplLog>,
}

impl BinlogBatch {
    /// Position reached once this batch is applied: the last row's txn id,
    /// or the starting position when the batch is empty
    pub fn next_pos(&self, from_pos: u64) -> u64 {
        self.rows
            .last()
            .map(|row| row.key().txn_id)
            .unwrap_or(from_pos)
    }

    /// Total operation payload bytes across the batch
    pub fn payload_bytes(&self) -> usize {
        self.rows.iter().map(|row| row.value().payload_len()).sum()
    }
}

/// Read one batch of binlog rows committed after `from_pos`.
///
/// Rows accumulate until the count or byte threshold is reached, but a
/// batch only ever closes between transactions: rows sharing a txn id
/// are kept together even past the byte bound, so the receiver applies
/// whole transactions or none. An exhausted cursor closes the batch
/// with whatever was gathered, possibly nothing (the empty batch still
/// goes out as a heartbeat-like exchange).
pub fn read_binlog_batch(store: &Store, from_pos: u64) -> Result<BinlogBatch, ReplError> {
    let txn = store.create_transaction()?;
    let mut cursor = txn.create_binlog_cursor(from_pos + 1);

    let mut rows: Vec<ReplLog> = Vec::new();
    let mut now_id = 0u64;
    let mut payload_bytes = 0usize;

    loop {
        match cursor.next() {
            Ok(row) => {
                let txn_id = row.key().txn_id;
                if now_id != 0
                    && txn_id != now_id
                    && (rows.len() >= SUGGEST_BATCH || payload_bytes >= SUGGEST_BYTES)
                {
                    break;
                }
                now_id = txn_id;
                payload_bytes += row.value().payload_len();
                rows.push(row);
            }
            Err(StorageError::Exhausted) => break,
            Err(e) => {
                error!("iter binlog failed: {}", e);
                return Err(ReplError::Cursor(e));
            }
        }
    }

    Ok(BinlogBatch { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use storage::RowOp;

    fn open_store(dir: &str) -> Store {
        let _ = fs::remove_dir_all(dir);
        Store::open(0, dir).unwrap()
    }

    #[test]
    fn test_batch_cuts_at_count_threshold_boundary() {
        let dir = "/tmp/test_flux_batch_count";
        let store = open_store(dir);

        // 70 single-row transactions, txn ids 1..=70
        for i in 0..70 {
            store.set(&format!("k{}", i), "v").unwrap();
        }

        let batch = read_binlog_batch(&store, 0).unwrap();
        assert_eq!(batch.rows.len(), SUGGEST_BATCH);
        assert_eq!(batch.next_pos(0), 64);

        // the follow-up batch picks up exactly where the first stopped
        let rest = read_binlog_batch(&store, batch.next_pos(0)).unwrap();
        assert_eq!(rest.rows.len(), 6);
        assert_eq!(rest.next_pos(64), 70);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_oversize_transaction_is_never_split() {
        let dir = "/tmp/test_flux_batch_oversize";
        let store = open_store(dir);

        for i in 0..4 {
            store.set(&format!("warm{}", i), "x").unwrap();
        }
        // txn 5: three rows of 10 MiB each
        let big = "z".repeat(10 * 1024 * 1024);
        store
            .batch(vec![
                RowOp::Set { key: "b0".to_string(), value: big.clone() },
                RowOp::Set { key: "b1".to_string(), value: big.clone() },
                RowOp::Set { key: "b2".to_string(), value: big },
            ])
            .unwrap();

        let batch = read_binlog_batch(&store, 4).unwrap();
        assert_eq!(batch.rows.len(), 3);
        assert!(batch.payload_bytes() >= 30 * 1024 * 1024);
        assert_eq!(batch.next_pos(4), 5);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_byte_threshold_closes_at_next_transaction() {
        let dir = "/tmp/test_flux_batch_bytes";
        let store = open_store(dir);

        let nine_mib = "y".repeat(9 * 1024 * 1024);
        for i in 0..3 {
            store.set(&format!("big{}", i), &nine_mib).unwrap();
        }

        // 9 MiB after txn 1, 18 MiB after txn 2 -- txn 3 opens past the bound
        let batch = read_binlog_batch(&store, 0).unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.next_pos(0), 2);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_exhausted_cursor_yields_empty_batch() {
        let dir = "/tmp/test_flux_batch_empty";
        let store = open_store(dir);
        store.set("only", "row").unwrap();

        let batch = read_binlog_batch(&store, 1).unwrap();
        assert!(batch.rows.is_empty());
        assert_eq!(batch.next_pos(1), 1);

        fs::remove_dir_all(dir).unwrap();
    }
}
