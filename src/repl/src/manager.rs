use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use log::{error, info, warn};
use tokio::net::TcpStream;
use storage::SegmentMgr;

use crate::batch::read_binlog_batch;
use crate::client::PeerClient;
use crate::codec;
use crate::config::ReplConfig;
use crate::error::ReplError;
use crate::fullsync;
use crate::pool::WorkerPool;
use crate::stats::ReplMetrics;

const LINE_TIMEOUT: Duration = Duration::from_secs(1);
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Bookkeeping for one registered replica: destination shard, applied
/// position, scheduling state and the owned connection.
struct MPovStatus {
    dst_store_id: u32,
    binlog_pos: u64,
    is_running: bool,
    next_sched_time: Instant,
    client: Arc<PeerClient>,
    client_id: u64,
}

/// Observable snapshot of one replica's state
#[derive(Debug, Clone)]
pub struct ReplicaInfo {
    pub client_id: u64,
    pub dst_store_id: u32,
    pub binlog_pos: u64,
    pub remote: String,
}

struct ManagerState {
    /// Per store: client id -> replica bookkeeping
    push_status: Vec<HashMap<u64, MPovStatus>>,
    /// Per store: smallest resumable binlog position
    first_binlog_id: Vec<u64>,
}

/// Master-side replication manager.
///
/// Owns the per-store replica tables and the two worker pools, performs
/// the incremental-sync handshake, admits full-sync requests, and drives
/// the periodic push scheduler. The state mutex serialises bookkeeping
/// only and is never held across socket or disk I/O; per-replica
/// serialisation is the `is_running` flag.
pub struct ReplManager {
    config: ReplConfig,
    segments: Arc<SegmentMgr>,
    state: Mutex<ManagerState>,
    client_id_gen: AtomicU64,
    full_pusher: WorkerPool,
    incr_pusher: WorkerPool,
    metrics: ReplMetrics,
    shutdown: AtomicBool,
}

impl ReplManager {
    pub fn new(config: ReplConfig, segments: Arc<SegmentMgr>) -> Self {
        let instance_num = segments.instance_num() as usize;
        let mut first_binlog_id = Vec::with_capacity(instance_num);
        for id in 0..instance_num {
            let first = segments
                .get_instance_by_id(id as u32)
                .map(|store| store.first_binlog_id())
                .unwrap_or(0);
            first_binlog_id.push(first);
        }

        let full_pusher = WorkerPool::new("full-pusher", config.full_pusher_pool);
        let incr_pusher = WorkerPool::new("incr-pusher", config.incr_pusher_pool);

        ReplManager {
            config,
            segments,
            state: Mutex::new(ManagerState {
                push_status: (0..instance_num).map(|_| HashMap::new()).collect(),
                first_binlog_id,
            }),
            client_id_gen: AtomicU64::new(0),
            full_pusher,
            incr_pusher,
            metrics: ReplMetrics::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn metrics(&self) -> &ReplMetrics {
        &self.metrics
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the periodic push scheduler
    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            info!(
                "replication scheduler started ({:?} sweep)",
                self.config.sched_interval
            );
            loop {
                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(self.config.sched_interval).await;
                for (store_id, client_id) in self.claim_ready() {
                    let mgr = Arc::clone(&self);
                    self.incr_pusher.spawn(async move {
                        mgr.master_push_routine(store_id, client_id).await;
                    });
                }
            }
            info!("replication scheduler stopped");
        });
    }

    /// Stop the scheduler; in-flight push routines run to completion
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Claim every ready entry for dispatch.
    ///
    /// An entry is ready when no iteration is in flight and its
    /// scheduled time has arrived; claiming sets `is_running` under the
    /// mutex so the same entry is never dispatched twice.
    fn claim_ready(&self) -> Vec<(u32, u64)> {
        let now = Instant::now();
        let mut st = self.state();
        let mut ready = Vec::new();
        for (store_id, entries) in st.push_status.iter_mut().enumerate() {
            for (client_id, mpov) in entries.iter_mut() {
                if !mpov.is_running && mpov.next_sched_time <= now {
                    mpov.is_running = true;
                    ready.push((store_id as u32, *client_id));
                }
            }
        }
        ready
    }

    /// Hand a fresh `FULLSYNC` connection to the snapshot supplier.
    ///
    /// The saturation probe is advisory: the pool can fill between the
    /// check and the schedule, and the queued task then waits for a
    /// permit.
    pub async fn supply_full_sync(&self, stream: TcpStream, store_id_arg: &str) {
        let client = PeerClient::new(stream, self.config.max_frame_bytes);

        if self.full_pusher.is_full() {
            let _ = client
                .write_line(&codec::err_line(&ReplError::AdmissionFull), LINE_TIMEOUT)
                .await;
            return;
        }

        let store_id = match store_id_arg.parse::<u32>() {
            Ok(id) if id < self.segments.instance_num() => id,
            _ => {
                let _ = client
                    .write_line(&codec::err_line(&ReplError::InvalidStore), LINE_TIMEOUT)
                    .await;
                return;
            }
        };

        let store = match self.segments.get_instance_by_id(store_id) {
            Some(store) => store,
            None => {
                // a validated id always resolves; reaching here means the
                // segment table itself is broken
                error!("store {} vanished from the segment table", store_id);
                return;
            }
        };

        info!(
            "fullsync for store {} requested by {}",
            store_id,
            client.remote_repr()
        );
        let metrics = self.metrics.clone();
        self.full_pusher.spawn(async move {
            fullsync::supply_full_sync_routine(client, store, metrics).await;
        });
    }

    /// Incremental-sync handshake, master side.
    ///
    /// Exchange: slave sends `INCRSYNC`, master answers `+OK`, slave
    /// answers `+PONG`, then batches flow. The `+PONG` turn keeps the
    /// `+OK` from coalescing with the first batch in the slave's read
    /// buffer, since batch frames have no fixed length.
    ///
    /// The position check before `+OK` is an optimistic fast fail; the
    /// re-check during insertion below is the authoritative one.
    pub async fn register_incr_sync(
        &self,
        stream: TcpStream,
        store_id_arg: &str,
        dst_store_id_arg: &str,
        binlog_pos_arg: &str,
    ) {
        let client = PeerClient::new(stream, self.config.max_frame_bytes);

        let parsed = store_id_arg.parse::<u64>().and_then(|store_id| {
            let dst_store_id = dst_store_id_arg.parse::<u64>()?;
            let binlog_pos = binlog_pos_arg.parse::<u64>()?;
            Ok((store_id, dst_store_id, binlog_pos))
        });
        let (store_id, dst_store_id, binlog_pos) = match parsed {
            Ok(v) => v,
            Err(e) => {
                let err = ReplError::Parse(e.to_string());
                let _ = client.write_line(&codec::err_line(&err), LINE_TIMEOUT).await;
                return;
            }
        };

        let instance_num = self.segments.instance_num() as u64;
        if store_id >= instance_num || dst_store_id >= instance_num {
            let _ = client
                .write_line(&codec::err_line(&ReplError::InvalidStore), LINE_TIMEOUT)
                .await;
            return;
        }
        let store_id = store_id as u32;
        let dst_store_id = dst_store_id as u32;

        let first_pos = self.state().first_binlog_id[store_id as usize];
        if first_pos > binlog_pos {
            let err = ReplError::StaleOffset {
                first: first_pos,
                requested: binlog_pos,
            };
            let _ = client.write_line(&codec::err_line(&err), LINE_TIMEOUT).await;
            return;
        }

        if let Err(e) = client.write_line(codec::REPLY_OK, LINE_TIMEOUT).await {
            warn!("incrsync handshake write failed: {}", e);
            return;
        }
        match client.read_line(LINE_TIMEOUT).await {
            Ok(line) if line == codec::REPLY_PONG => {}
            Ok(line) => {
                warn!("incrsync handshake not +PONG: {}", line);
                return;
            }
            Err(e) => {
                warn!("incrsync handshake failed: {}", e);
                return;
            }
        }

        let remote = client.remote_repr().to_string();
        let registered = {
            let mut st = self.state();
            if st.first_binlog_id[store_id as usize] > binlog_pos {
                // lost the race against retention; the slave sees a
                // closed connection and escalates to full sync
                false
            } else {
                let client_id = self.client_id_gen.fetch_add(1, Ordering::SeqCst);
                st.push_status[store_id as usize].insert(
                    client_id,
                    MPovStatus {
                        dst_store_id,
                        binlog_pos,
                        is_running: false,
                        next_sched_time: Instant::now(),
                        client: Arc::new(client),
                        client_id,
                    },
                );
                true
            }
        };

        if registered {
            self.metrics.replicas_registered.fetch_add(1, Ordering::SeqCst);
        }
        info!(
            "slave {} incrsync registration {}",
            remote,
            if registered { "ok" } else { "failed" }
        );
    }

    /// One push iteration for a single replica.
    ///
    /// The entry state is snapshotted under the mutex; all network I/O
    /// happens outside it. Whatever path exits, the drop guard returns
    /// the entry to the scheduler with its next run time -- unless a
    /// send failure erased it, which also closes the socket.
    pub async fn master_push_routine(self: Arc<Self>, store_id: u32, client_id: u64) {
        let mut sched = SchedGuard {
            mgr: Arc::clone(&self),
            store_id,
            client_id,
            next_sched_time: Instant::now(),
        };

        let (binlog_pos, client, dst_store_id) = {
            let st = self.state();
            match st.push_status[store_id as usize].get(&client_id) {
                Some(mpov) => (mpov.binlog_pos, Arc::clone(&mpov.client), mpov.dst_store_id),
                None => {
                    sched.next_sched_time = Instant::now() + RETRY_BACKOFF;
                    return;
                }
            }
        };

        match self
            .master_send_binlog(&client, store_id, dst_store_id, binlog_pos)
            .await
        {
            Err(e) => {
                warn!(
                    "push binlog to {} failed: {}",
                    client.remote_repr(),
                    e
                );
                let mut st = self.state();
                // removing an already-removed entry is a no-op
                st.push_status[store_id as usize].remove(&client_id);
                drop(st);
                self.metrics.replicas_dropped.fetch_add(1, Ordering::SeqCst);
            }
            Ok(new_pos) => {
                let mut st = self.state();
                if let Some(mpov) = st.push_status[store_id as usize].get_mut(&client_id) {
                    mpov.binlog_pos = new_pos;
                }
                drop(st);
                sched.next_sched_time = if new_pos > binlog_pos {
                    Instant::now()
                } else {
                    Instant::now() + RETRY_BACKOFF
                };
            }
        }
    }

    /// Read one transaction-aligned batch, frame it, send it, and wait
    /// for the replica's acknowledgement. Returns the position reached.
    async fn master_send_binlog(
        &self,
        client: &PeerClient,
        store_id: u32,
        dst_store_id: u32,
        binlog_pos: u64,
    ) -> Result<u64, ReplError> {
        let store = self
            .segments
            .get_instance_by_id(store_id)
            .ok_or(ReplError::InvalidStore)?;

        let batch = read_binlog_batch(&store, binlog_pos)?;
        let frame = codec::encode_apply_binlogs(dst_store_id, &batch.rows);
        let timeout = codec::write_timeout(frame.len());

        client.write_data(&frame, timeout).await?;
        let reply = client.read_line(timeout).await?;
        if reply != codec::REPLY_OK {
            warn!(
                "store {} dst store {} apply binlogs failed: {}",
                store_id, dst_store_id, reply
            );
            return Err(ReplError::Protocol(reply));
        }

        if batch.rows.is_empty() {
            self.metrics.empty_pushes.fetch_add(1, Ordering::SeqCst);
        } else {
            self.metrics.batches_pushed.fetch_add(1, Ordering::SeqCst);
            self.metrics
                .rows_pushed
                .fetch_add(batch.rows.len() as u64, Ordering::SeqCst);
            self.metrics
                .bytes_pushed
                .fetch_add(frame.len() as u64, Ordering::SeqCst);
        }

        Ok(batch.next_pos(binlog_pos))
    }

    /// Retention hook: record that positions below `pos` are no longer
    /// resumable for this store. Later registrations below the watermark
    /// are rejected.
    pub fn update_first_binlog_id(&self, store_id: u32, pos: u64) {
        if store_id >= self.segments.instance_num() {
            return;
        }
        let mut st = self.state();
        st.first_binlog_id[store_id as usize] = pos;
    }

    /// Snapshot of the replicas registered for one store
    pub fn replicas(&self, store_id: u32) -> Vec<ReplicaInfo> {
        let st = self.state();
        let Some(entries) = st.push_status.get(store_id as usize) else {
            return Vec::new();
        };
        let mut replicas: Vec<ReplicaInfo> = entries
            .values()
            .map(|mpov| ReplicaInfo {
                client_id: mpov.client_id,
                dst_store_id: mpov.dst_store_id,
                binlog_pos: mpov.binlog_pos,
                remote: mpov.client.remote_repr().to_string(),
            })
            .collect();
        replicas.sort_by_key(|r| r.client_id);
        replicas
    }
}

/// Returns a finished push iteration to the scheduler.
///
/// Runs on every exit path of `master_push_routine`: if the entry still
/// exists its `is_running` flag is cleared and the next run time stored;
/// an erased entry needs nothing.
struct SchedGuard {
    mgr: Arc<ReplManager>,
    store_id: u32,
    client_id: u64,
    next_sched_time: Instant,
}

impl Drop for SchedGuard {
    fn drop(&mut self) {
        let mut st = self.mgr.state();
        if let Some(mpov) = st.push_status[self.store_id as usize].get_mut(&self.client_id) {
            debug_assert!(mpov.is_running);
            mpov.is_running = false;
            mpov.next_sched_time = self.next_sched_time;
        }
    }
}
