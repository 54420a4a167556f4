use std::path::Path;
use std::sync::Arc;
use log::info;

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::store::Store;

/// Owns the fixed set of store instances and resolves them by id.
///
/// Instance ids are dense in `[0, instance_num)`; each instance lives in
/// its own subdirectory of the data dir.
pub struct SegmentMgr {
    stores: Vec<Arc<Store>>,
}

impl SegmentMgr {
    /// Open all store instances under the configured data directory
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let base = Path::new(&config.data_dir);
        let mut stores = Vec::with_capacity(config.instance_num as usize);
        for id in 0..config.instance_num {
            stores.push(Arc::new(Store::open(id, base.join(id.to_string()))?));
        }

        info!(
            "SegmentMgr initialized with {} store instances under {}",
            stores.len(),
            config.data_dir
        );

        Ok(SegmentMgr { stores })
    }

    pub fn instance_num(&self) -> u32 {
        self.stores.len() as u32
    }

    pub fn get_instance_by_id(&self, id: u32) -> Option<Arc<Store>> {
        self.stores.get(id as usize).cloned()
    }

    /// Stop every instance
    pub fn stop_all(&self) {
        for store in &self.stores {
            store.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolves_instances_by_id() {
        let dir = "/tmp/test_flux_segment_mgr";
        let _ = fs::remove_dir_all(dir);

        let config = StorageConfig {
            data_dir: dir.to_string(),
            instance_num: 3,
        };
        let mgr = SegmentMgr::open(&config).unwrap();

        assert_eq!(mgr.instance_num(), 3);
        assert_eq!(mgr.get_instance_by_id(2).unwrap().id(), 2);
        assert!(mgr.get_instance_by_id(3).is_none());

        fs::remove_dir_all(dir).unwrap();
    }
}
