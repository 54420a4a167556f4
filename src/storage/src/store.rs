use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use log::info;

use crate::binlog::{self, BinlogWriter, ReplLog, RowOp};
use crate::error::StorageError;

const BINLOG_FILE: &str = "binlog.log";
const SNAPSHOT_FILE: &str = "SNAPSHOT";
const BACKUP_DIR: &str = "backup";

/// Consistent backup of one store: an ordered (file name, size) manifest
/// of everything placed under `Store::backup_dir`.
#[derive(Debug, Clone)]
pub struct BackupInfo {
    files: Vec<(String, u64)>,
}

impl BackupInfo {
    pub fn file_list(&self) -> &[(String, u64)] {
        &self.files
    }
}

/// One store instance (shard).
///
/// Writes append to the binlog before touching the in-memory map
/// (write-ahead), and every row of one logical transaction shares a
/// `txn_id`. The binlog is the replication source of truth: cursors
/// opened through `create_transaction` read it in commit order.
pub struct Store {
    id: u32,
    dir: PathBuf,
    data: RwLock<HashMap<String, String>>,
    binlog: Mutex<BinlogWriter>,
    next_txn_id: AtomicU64,
    first_binlog_id: AtomicU64,
    running: AtomicBool,
    backup_active: AtomicBool,
}

impl Store {
    /// Open a store, replaying its binlog to rebuild the in-memory map
    pub fn open<P: AsRef<Path>>(id: u32, dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let binlog_path = dir.join(BINLOG_FILE);
        let entries = binlog::read_binlog(&binlog_path)?;

        let mut data = HashMap::new();
        let mut max_txn = 0u64;
        let mut min_txn = 0u64;
        for entry in &entries {
            let txn = entry.key().txn_id;
            max_txn = max_txn.max(txn);
            if min_txn == 0 {
                min_txn = txn;
            }
            apply_row(&mut data, &entry.value().op);
        }

        // A log whose earliest row is txn 1 is complete from the origin;
        // anything later means the head was truncated away.
        let first_binlog_id = if min_txn > 1 { min_txn } else { 0 };

        if !entries.is_empty() {
            info!(
                "store {}: recovered {} binlog rows (txn {}..={})",
                id,
                entries.len(),
                min_txn,
                max_txn
            );
        }

        Ok(Store {
            id,
            dir,
            data: RwLock::new(data),
            binlog: Mutex::new(BinlogWriter::open(&binlog_path)?),
            next_txn_id: AtomicU64::new(max_txn + 1),
            first_binlog_id: AtomicU64::new(first_binlog_id),
            running: AtomicBool::new(true),
            backup_active: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the store; subsequent writes and transactions are rejected
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn binlog_writer(&self) -> MutexGuard<'_, BinlogWriter> {
        self.binlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Write path ====================

    /// Set a key-value pair as a single-row transaction
    pub fn set(&self, key: &str, value: &str) -> Result<u64, StorageError> {
        self.batch(vec![RowOp::Set {
            key: key.to_string(),
            value: value.to_string(),
        }])
    }

    /// Delete a key as a single-row transaction
    pub fn delete(&self, key: &str) -> Result<u64, StorageError> {
        self.batch(vec![RowOp::Delete {
            key: key.to_string(),
        }])
    }

    /// Commit a multi-row transaction.
    ///
    /// All rows share one freshly allocated `txn_id` and are appended to
    /// the binlog in a single flush before the in-memory apply.
    pub fn batch(&self, ops: Vec<RowOp>) -> Result<u64, StorageError> {
        if !self.is_running() {
            return Err(StorageError::NotRunning);
        }
        if ops.is_empty() {
            return Err(StorageError::EmptyBatch);
        }

        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let rows: Vec<ReplLog> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| ReplLog::new(txn_id, i as u32, op.clone()))
            .collect();

        // binlog lock is held across the apply so a concurrent backup
        // never observes a row that is not yet in the map
        let mut writer = self.binlog_writer();
        writer.append_all(&rows)?;

        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        for op in &ops {
            apply_row(&mut data, op);
        }
        drop(data);
        drop(writer);

        Ok(txn_id)
    }

    // ==================== Read path ====================

    pub fn get(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Greatest transaction id committed so far (0 when the store is fresh)
    pub fn last_txn_id(&self) -> u64 {
        self.next_txn_id.load(Ordering::SeqCst) - 1
    }

    // ==================== Binlog cursoring ====================

    /// Open a read view over the committed binlog
    pub fn create_transaction(&self) -> Result<Txn, StorageError> {
        if !self.is_running() {
            return Err(StorageError::NotRunning);
        }
        // the writer flushes per transaction, so a plain file read sees
        // every committed row
        let entries = binlog::read_binlog(self.binlog_path())?;
        Ok(Txn { entries })
    }

    /// Smallest position resumable from this store's binlog.
    ///
    /// 0 while the log is complete from the origin; advanced by
    /// `truncate_binlog`. Readable concurrently with truncation.
    pub fn first_binlog_id(&self) -> u64 {
        self.first_binlog_id.load(Ordering::SeqCst)
    }

    /// Retention: drop binlog rows with `txn_id <= up_to`.
    ///
    /// The newest transaction is always kept so transaction-id allocation
    /// survives a restart. Advances `first_binlog_id` to the truncation
    /// watermark + 1.
    pub fn truncate_binlog(&self, up_to: u64) -> Result<(), StorageError> {
        let last = self.last_txn_id();
        if last == 0 {
            return Ok(());
        }
        let up_to = up_to.min(last - 1);
        if up_to == 0 {
            return Ok(());
        }

        let mut writer = self.binlog_writer();
        let entries = binlog::read_binlog(self.binlog_path())?;
        let retained: Vec<&ReplLog> = entries
            .iter()
            .filter(|e| e.key().txn_id > up_to)
            .collect();

        let path = self.binlog_path();
        let backup_path = path.with_extension("log.bak");
        std::fs::rename(&path, &backup_path)?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut out = BufWriter::new(file);
        for entry in &retained {
            out.write_all(&entry.encode_record())?;
        }
        out.flush()?;
        std::fs::remove_file(&backup_path)?;

        *writer = BinlogWriter::open(&path)?;
        drop(writer);

        self.first_binlog_id.fetch_max(up_to + 1, Ordering::SeqCst);
        info!(
            "store {}: binlog truncated through txn {} ({} rows retained)",
            self.id,
            up_to,
            retained.len()
        );
        Ok(())
    }

    // ==================== Backup ====================

    pub fn backup_dir(&self) -> PathBuf {
        self.dir.join(BACKUP_DIR)
    }

    fn binlog_path(&self) -> PathBuf {
        self.dir.join(BINLOG_FILE)
    }

    /// Take a consistent backup into `backup_dir`.
    ///
    /// At most one backup may be active per store; callers must pair this
    /// with `release_backup` on every exit path.
    pub fn backup(&self) -> Result<BackupInfo, StorageError> {
        if !self.is_running() {
            return Err(StorageError::NotRunning);
        }
        if self.backup_active.swap(true, Ordering::SeqCst) {
            return Err(StorageError::BackupActive);
        }

        match self.backup_inner() {
            Ok(info) => Ok(info),
            Err(e) => {
                // failed backups do not keep the slot occupied
                let _ = std::fs::remove_dir_all(self.backup_dir());
                self.backup_active.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn backup_inner(&self) -> Result<BackupInfo, StorageError> {
        // holding the binlog lock stalls writers, keeping the snapshot
        // and the binlog copy mutually consistent
        let writer = self.binlog_writer();

        let backup_dir = self.backup_dir();
        let _ = std::fs::remove_dir_all(&backup_dir);
        std::fs::create_dir_all(&backup_dir)?;

        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let snapshot = serde_json::to_vec(&*data)
            .map_err(|e| StorageError::Corrupt(format!("snapshot encode failed: {}", e)))?;
        drop(data);

        let snapshot_path = backup_dir.join(SNAPSHOT_FILE);
        let mut file = File::create(&snapshot_path)?;
        file.write_all(&snapshot)?;
        file.flush()?;

        let binlog_copy = backup_dir.join(BINLOG_FILE);
        let binlog_size = if self.binlog_path().exists() {
            std::fs::copy(self.binlog_path(), &binlog_copy)?
        } else {
            File::create(&binlog_copy)?;
            0
        };
        drop(writer);

        let files = vec![
            (SNAPSHOT_FILE.to_string(), snapshot.len() as u64),
            (BINLOG_FILE.to_string(), binlog_size),
        ];

        info!("store {}: backup taken ({} files)", self.id, files.len());
        Ok(BackupInfo { files })
    }

    /// Release the backup taken by `backup`; safe to call on every exit path
    pub fn release_backup(&self) -> Result<(), StorageError> {
        let backup_dir = self.backup_dir();
        if backup_dir.exists() {
            std::fs::remove_dir_all(&backup_dir)?;
        }
        self.backup_active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn apply_row(data: &mut HashMap<String, String>, op: &RowOp) {
    match op {
        RowOp::Set { key, value } => {
            data.insert(key.clone(), value.clone());
        }
        RowOp::Delete { key } => {
            data.remove(key);
        }
    }
}

/// Read view over a store's committed binlog
pub struct Txn {
    entries: Vec<ReplLog>,
}

impl Txn {
    /// Cursor over rows with `txn_id >= from_id`, in commit order
    pub fn create_binlog_cursor(&self, from_id: u64) -> BinlogCursor<'_> {
        let start = self
            .entries
            .partition_point(|e| e.key().txn_id < from_id);
        BinlogCursor {
            entries: &self.entries,
            idx: start,
        }
    }
}

/// Ordered cursor over binlog rows
pub struct BinlogCursor<'a> {
    entries: &'a [ReplLog],
    idx: usize,
}

impl BinlogCursor<'_> {
    /// Next row, or `StorageError::Exhausted` past the end of the log
    pub fn next(&mut self) -> Result<ReplLog, StorageError> {
        match self.entries.get(self.idx) {
            Some(entry) => {
                self.idx += 1;
                Ok(entry.clone())
            }
            None => Err(StorageError::Exhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn open_store(dir: &str) -> Store {
        let _ = fs::remove_dir_all(dir);
        Store::open(0, dir).unwrap()
    }

    #[test]
    fn test_batch_rows_share_txn_id() {
        let dir = "/tmp/test_flux_store_batch";
        let store = open_store(dir);

        let txn = store
            .batch(vec![
                RowOp::Set { key: "a".to_string(), value: "1".to_string() },
                RowOp::Set { key: "b".to_string(), value: "2".to_string() },
            ])
            .unwrap();
        assert_eq!(txn, 1);

        let view = store.create_transaction().unwrap();
        let mut cursor = view.create_binlog_cursor(1);
        let first = cursor.next().unwrap();
        let second = cursor.next().unwrap();
        assert_eq!(first.key().txn_id, 1);
        assert_eq!(second.key().txn_id, 1);
        assert_eq!(first.key().local_id, 0);
        assert_eq!(second.key().local_id, 1);
        assert!(matches!(cursor.next(), Err(StorageError::Exhausted)));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_cursor_starts_past_position() {
        let dir = "/tmp/test_flux_store_cursor";
        let store = open_store(dir);

        for i in 0..5 {
            store.set(&format!("k{}", i), "v").unwrap();
        }

        let view = store.create_transaction().unwrap();
        let mut cursor = view.create_binlog_cursor(4);
        assert_eq!(cursor.next().unwrap().key().txn_id, 4);
        assert_eq!(cursor.next().unwrap().key().txn_id, 5);
        assert!(matches!(cursor.next(), Err(StorageError::Exhausted)));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_recovery_resumes_txn_ids() {
        let dir = "/tmp/test_flux_store_recovery";
        {
            let store = open_store(dir);
            store.set("a", "1").unwrap();
            store.set("b", "2").unwrap();
        }

        let store = Store::open(0, dir).unwrap();
        assert_eq!(store.get("a").as_deref(), Some("1"));
        assert_eq!(store.last_txn_id(), 2);
        assert_eq!(store.set("c", "3").unwrap(), 3);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_truncate_advances_first_binlog_id() {
        let dir = "/tmp/test_flux_store_truncate";
        let store = open_store(dir);

        for i in 0..10 {
            store.set(&format!("k{}", i), "v").unwrap();
        }
        assert_eq!(store.first_binlog_id(), 0);

        store.truncate_binlog(6).unwrap();
        assert_eq!(store.first_binlog_id(), 7);

        let view = store.create_transaction().unwrap();
        let mut cursor = view.create_binlog_cursor(0);
        assert_eq!(cursor.next().unwrap().key().txn_id, 7);

        // recovery infers the truncated head
        drop(store);
        let store = Store::open(0, dir).unwrap();
        assert_eq!(store.first_binlog_id(), 7);
        assert_eq!(store.last_txn_id(), 10);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_backup_manifest_and_release() {
        let dir = "/tmp/test_flux_store_backup";
        let store = open_store(dir);
        store.set("a", "1").unwrap();

        let info = store.backup().unwrap();
        let names: Vec<&str> = info.file_list().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["SNAPSHOT", "binlog.log"]);
        for (name, size) in info.file_list() {
            let on_disk = fs::metadata(store.backup_dir().join(name)).unwrap().len();
            assert_eq!(on_disk, *size);
        }

        // second backup is rejected while the first is held
        assert!(matches!(store.backup(), Err(StorageError::BackupActive)));

        store.release_backup().unwrap();
        assert!(!store.backup_dir().exists());

        // and allowed again once released
        store.backup().unwrap();
        store.release_backup().unwrap();

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_stopped_store_rejects_writes() {
        let dir = "/tmp/test_flux_store_stopped";
        let store = open_store(dir);
        store.stop();

        assert!(matches!(store.set("a", "1"), Err(StorageError::NotRunning)));
        assert!(matches!(store.create_transaction(), Err(StorageError::NotRunning)));
        assert!(matches!(store.backup(), Err(StorageError::NotRunning)));

        fs::remove_dir_all(dir).unwrap();
    }
}
