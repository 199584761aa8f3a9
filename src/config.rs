use std::time::Duration;

/// Configuration for a store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Save automatically this long after the first unsaved change
    /// (default: None, never)
    pub autosave_interval: Option<Duration>,

    /// Suffix of the temporary file a save is written to (default: ".tmp")
    pub temp_suffix: String,

    /// Bytes buffered by the table writer between writes (default: 64KB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            autosave_interval: None,
            temp_suffix: ".tmp".to_owned(),
            write_buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the autosave interval; None disables autosave
    pub fn autosave_interval(mut self, interval: Option<Duration>) -> Self {
        self.autosave_interval = interval;
        self
    }

    /// Set the temporary file suffix
    pub fn temp_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.temp_suffix = suffix.into();
        self
    }

    /// Set the table writer buffer size
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }
}
