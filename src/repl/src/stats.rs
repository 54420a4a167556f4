use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Replication metrics
#[derive(Clone)]
pub struct ReplMetrics {
    pub batches_pushed: Arc<AtomicU64>,
    pub rows_pushed: Arc<AtomicU64>,
    pub bytes_pushed: Arc<AtomicU64>,
    pub empty_pushes: Arc<AtomicU64>,
    pub full_syncs_started: Arc<AtomicU64>,
    pub full_syncs_completed: Arc<AtomicU64>,
    pub full_syncs_failed: Arc<AtomicU64>,
    pub replicas_registered: Arc<AtomicU64>,
    pub replicas_dropped: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl ReplMetrics {
    pub fn new() -> Self {
        ReplMetrics {
            batches_pushed: Arc::new(AtomicU64::new(0)),
            rows_pushed: Arc::new(AtomicU64::new(0)),
            bytes_pushed: Arc::new(AtomicU64::new(0)),
            empty_pushes: Arc::new(AtomicU64::new(0)),
            full_syncs_started: Arc::new(AtomicU64::new(0)),
            full_syncs_completed: Arc::new(AtomicU64::new(0)),
            full_syncs_failed: Arc::new(AtomicU64::new(0)),
            replicas_registered: Arc::new(AtomicU64::new(0)),
            replicas_dropped: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn to_json(&self) -> String {
        let uptime_secs = self.start_time.elapsed().as_secs();
        format!(
            r#"{{"batches_pushed":{},"rows_pushed":{},"bytes_pushed":{},"empty_pushes":{},"full_syncs_started":{},"full_syncs_completed":{},"full_syncs_failed":{},"replicas_registered":{},"replicas_dropped":{},"uptime_seconds":{}}}"#,
            self.batches_pushed.load(Ordering::SeqCst),
            self.rows_pushed.load(Ordering::SeqCst),
            self.bytes_pushed.load(Ordering::SeqCst),
            self.empty_pushes.load(Ordering::SeqCst),
            self.full_syncs_started.load(Ordering::SeqCst),
            self.full_syncs_completed.load(Ordering::SeqCst),
            self.full_syncs_failed.load(Ordering::SeqCst),
            self.replicas_registered.load(Ordering::SeqCst),
            self.replicas_dropped.load(Ordering::SeqCst),
            uptime_secs,
        )
    }
}

impl Default for ReplMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_snapshot() {
        let metrics = ReplMetrics::new();
        metrics.batches_pushed.fetch_add(3, Ordering::SeqCst);
        metrics.rows_pushed.fetch_add(42, Ordering::SeqCst);

        let json = metrics.to_json();
        assert!(json.contains(r#""batches_pushed":3"#));
        assert!(json.contains(r#""rows_pushed":42"#));
    }
}
