/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per store instance
    pub data_dir: String,
    /// Number of store instances (shards)
    pub instance_num: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: "./data".to_string(),
            instance_num: 10,
        }
    }
}

impl StorageConfig {
    /// Create a config rooted at the given directory
    pub fn with_dir(dir: &str) -> Self {
        StorageConfig {
            data_dir: dir.to_string(),
            ..Default::default()
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("FLUX_DATA_DIR") {
            config.data_dir = dir;
        }

        if let Ok(num) = std::env::var("FLUX_INSTANCE_NUM") {
            match num.parse() {
                Ok(n) if n > 0 => config.instance_num = n,
                _ => log::warn!("Invalid FLUX_INSTANCE_NUM '{}', using default", num),
            }
        }

        config
    }
}
