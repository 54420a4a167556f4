use std::time::Duration;

/// Replication manager configuration
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Worker pool serving full-sync snapshots
    pub full_pusher_pool: usize,
    /// Worker pool serving incremental push iterations
    pub incr_pusher_pool: usize,
    /// Scheduler sweep interval
    pub sched_interval: Duration,
    /// Frame cap for replica connections
    pub max_frame_bytes: usize,
}

impl Default for ReplConfig {
    fn default() -> Self {
        ReplConfig {
            full_pusher_pool: 4,
            incr_pusher_pool: 8,
            sched_interval: Duration::from_millis(100),
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ReplConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(n) = std::env::var("FLUX_FULL_PUSHER_POOL") {
            match n.parse() {
                Ok(v) if v > 0 => config.full_pusher_pool = v,
                _ => log::warn!("Invalid FLUX_FULL_PUSHER_POOL '{}', using default", n),
            }
        }

        if let Ok(n) = std::env::var("FLUX_INCR_PUSHER_POOL") {
            match n.parse() {
                Ok(v) if v > 0 => config.incr_pusher_pool = v,
                _ => log::warn!("Invalid FLUX_INCR_PUSHER_POOL '{}', using default", n),
            }
        }

        if let Ok(ms) = std::env::var("FLUX_SCHED_INTERVAL_MS") {
            match ms.parse() {
                Ok(v) if v > 0 => config.sched_interval = Duration::from_millis(v),
                _ => log::warn!("Invalid FLUX_SCHED_INTERVAL_MS '{}', using default", ms),
            }
        }

        if let Ok(bytes) = std::env::var("FLUX_MAX_FRAME_BYTES") {
            match bytes.parse() {
                Ok(v) if v > 0 => config.max_frame_bytes = v,
                _ => log::warn!("Invalid FLUX_MAX_FRAME_BYTES '{}', using default", bytes),
            }
        }

        config
    }
}
