use crate::error::QueueError;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    // 每次写入后刷新到操作系统缓存
    Flush,
    // 刷新后再 fsync 到磁盘
    Sync,
}

/// How a removal is made durable when the compaction threshold is not reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// One tombstone per removing call, whatever the number of elements
    /// removed. Batch or non-head removals are not replayed exactly.
    SingleTombstone,
    /// One tombstone per removed element when a call removes a run of
    /// elements starting at the head; compact when it removes anything else.
    Exact,
}

pub const DEFAULT_CONFIG_FILE: &str = "titanium_queue.conf";
pub const DEFAULT_DEFRAG_INTERVAL: usize = 20;
pub const DEFAULT_WRITE_MODE: WriteMode = WriteMode::Flush;
pub const DEFAULT_REMOVAL_POLICY: RemovalPolicy = RemovalPolicy::SingleTombstone;
pub const DEFAULT_MAX_RECORD_SIZE: usize = 16 * 1024 * 1024; // 16 MB

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub defrag_interval: usize,
    pub write_mode: WriteMode,
    pub removal_policy: RemovalPolicy,
    pub max_record_size: usize,
    pub lock: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            defrag_interval: DEFAULT_DEFRAG_INTERVAL,
            write_mode: DEFAULT_WRITE_MODE,
            removal_policy: DEFAULT_REMOVAL_POLICY,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            lock: true,
        }
    }
}

impl QueueConfig {
    pub fn with_defrag_interval(mut self, defrag_interval: usize) -> Self {
        self.defrag_interval = defrag_interval;
        self
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn with_removal_policy(mut self, removal_policy: RemovalPolicy) -> Self {
        self.removal_policy = removal_policy;
        self
    }

    pub fn with_max_record_size(mut self, max_record_size: usize) -> Self {
        self.max_record_size = max_record_size;
        self
    }

    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_record_size == 0 {
            return Err("max_record_size must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Loads a `key = value` config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, QueueError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, QueueError> {
        let mut config = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim();
                match key.trim() {
                    "defrag_interval" => {
                        config.defrag_interval = value.parse().map_err(|e| {
                            QueueError::Config(format!(
                                "Invalid defrag_interval '{}': {}",
                                value, e
                            ))
                        })?;
                    }
                    "max_record_size" => {
                        config.max_record_size = value.parse().map_err(|e| {
                            QueueError::Config(format!(
                                "Invalid max_record_size '{}': {}",
                                value, e
                            ))
                        })?;
                    }
                    "lock" => {
                        config.lock = value.parse().map_err(|e| {
                            QueueError::Config(format!("Invalid lock '{}': {}", value, e))
                        })?;
                    }
                    "write_mode" => match value.to_lowercase().as_str() {
                        "flush" => config.write_mode = WriteMode::Flush,
                        "sync" => config.write_mode = WriteMode::Sync,
                        unknown => {
                            return Err(QueueError::Config(format!(
                                "Unknown write_mode variant: '{}'",
                                unknown
                            )));
                        }
                    },
                    "removal_policy" => match value.to_lowercase().as_str() {
                        "single_tombstone" => {
                            config.removal_policy = RemovalPolicy::SingleTombstone
                        }
                        "exact" => config.removal_policy = RemovalPolicy::Exact,
                        unknown => {
                            return Err(QueueError::Config(format!(
                                "Unknown removal_policy variant: '{}'",
                                unknown
                            )));
                        }
                    },
                    _ => {}
                }
            }
        }

        if let Err(e) = config.validate() {
            return Err(QueueError::Config(e));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = QueueConfig::load(Path::new("definitely_missing_queue.conf")).unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.defrag_interval, 20);
    }

    #[test]
    fn test_parse_all_keys() {
        let config = QueueConfig::parse(
            "# queue settings\n\
             defrag_interval = 5\n\
             write_mode = SYNC\n\
             removal_policy = exact\n\
             \n\
             max_record_size=1024\n\
             lock = false\n\
             unknown_key = ignored\n",
        )
        .unwrap();

        assert_eq!(config.defrag_interval, 5);
        assert_eq!(config.write_mode, WriteMode::Sync);
        assert_eq!(config.removal_policy, RemovalPolicy::Exact);
        assert_eq!(config.max_record_size, 1024);
        assert!(!config.lock);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            QueueConfig::parse("defrag_interval = -1"),
            Err(QueueError::Config(_))
        ));
        assert!(matches!(
            QueueConfig::parse("write_mod = sync\nwrite_mode = lazy"),
            Err(QueueError::Config(_))
        ));
        assert!(matches!(
            QueueConfig::parse("max_record_size = 0"),
            Err(QueueError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "defrag_interval = 0\n").unwrap();

        let config = QueueConfig::load(&path).unwrap();
        assert_eq!(config.defrag_interval, 0);
        assert_eq!(config.write_mode, DEFAULT_WRITE_MODE);
    }
}
