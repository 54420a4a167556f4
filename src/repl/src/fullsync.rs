use std::fs::File;
use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use log::{error, info};
use storage::Store;

use crate::client::PeerClient;
use crate::codec;
use crate::error::ReplError;
use crate::stats::ReplMetrics;

/// Chunk size for streaming backup files
const FULLSYNC_CHUNK: usize = 20 * 1024 * 1024;

const LINE_TIMEOUT: Duration = Duration::from_secs(1);

/// Releases the store's backup on every exit path of the supplier
struct BackupGuard {
    store: Arc<Store>,
}

impl Drop for BackupGuard {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_backup() {
            error!(
                "fullsync end clean store {} error: {}",
                self.store.id(),
                e
            );
        }
    }
}

/// Stream a consistent backup of `store` to the connected replica.
///
/// Protocol: one JSON manifest line mapping file name to byte size, then
/// for each file its name line followed by exactly that many raw bytes,
/// then one terminal line from the peer which is logged and not
/// interpreted. Any I/O failure drops the connection; the backup is
/// released regardless of how the routine exits.
pub(crate) async fn supply_full_sync_routine(
    client: PeerClient,
    store: Arc<Store>,
    metrics: ReplMetrics,
) {
    metrics.full_syncs_started.fetch_add(1, Ordering::SeqCst);

    if !store.is_running() {
        let _ = client
            .write_line("-ERR store is not running", LINE_TIMEOUT)
            .await;
        metrics.full_syncs_failed.fetch_add(1, Ordering::SeqCst);
        return;
    }

    let backup = match store.backup() {
        Ok(info) => info,
        Err(e) => {
            let err = ReplError::Backup(e.to_string());
            let _ = client
                .write_line(&codec::err_line(&err), LINE_TIMEOUT)
                .await;
            metrics.full_syncs_failed.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };
    let _guard = BackupGuard {
        store: Arc::clone(&store),
    };

    let mut manifest = serde_json::Map::new();
    for (name, size) in backup.file_list() {
        manifest.insert(name.clone(), serde_json::Value::from(*size));
    }
    let manifest_line = serde_json::Value::Object(manifest).to_string();
    if let Err(e) = client.write_line(&manifest_line, LINE_TIMEOUT).await {
        error!("store {}: manifest write failed: {}", store.id(), e);
        metrics.full_syncs_failed.fetch_add(1, Ordering::SeqCst);
        return;
    }

    let mut buf = vec![0u8; FULLSYNC_CHUNK];
    for (name, size) in backup.file_list() {
        if let Err(e) = client.write_line(name, LINE_TIMEOUT).await {
            error!("write fname {} to client failed: {}", name, e);
            metrics.full_syncs_failed.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let path = store.backup_dir().join(name);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                error!("open file {:?} for read failed: {}", path, e);
                metrics.full_syncs_failed.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        let mut remain = *size as usize;
        while remain > 0 {
            let n = remain.min(buf.len());
            if let Err(e) = file.read_exact(&mut buf[..n]) {
                error!("read file {:?} failed: {}", path, e);
                metrics.full_syncs_failed.fetch_add(1, Ordering::SeqCst);
                return;
            }
            if let Err(e) = client.write_data(&buf[..n], codec::write_timeout(n)).await {
                error!("write bulk to client failed: {}", e);
                metrics.full_syncs_failed.fetch_add(1, Ordering::SeqCst);
                return;
            }
            remain -= n;
        }
    }

    match client.read_line(LINE_TIMEOUT).await {
        Ok(reply) => {
            info!(
                "fullsync done, {} replied: {}",
                client.remote_repr(),
                reply
            );
            metrics.full_syncs_completed.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => {
            error!(
                "fullsync done, reading {} reply failed: {}",
                client.remote_repr(),
                e
            );
            metrics.full_syncs_failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
