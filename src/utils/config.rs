use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database URL
    pub database_url: String,

    /// Scheduler poll interval, seconds
    pub poll_interval_secs: u64,

    /// Scheduler backoff after a failed poll cycle, seconds
    pub poll_backoff_secs: u64,

    /// Chunk size for the transfer copy loop, bytes
    pub copy_buffer_bytes: usize,

    /// Pause between files within one transfer run, milliseconds
    pub inter_file_pause_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tidyflow.db".to_string(),
            poll_interval_secs: 60,
            poll_backoff_secs: 300,
            copy_buffer_bytes: 8 * 1024,
            inter_file_pause_ms: 300,
        }
    }
}

impl Config {
    /// Load config from the environment, falling back to defaults.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(interval) = std::env::var("POLL_INTERVAL_SECS") {
            config.poll_interval_secs = interval.parse()?;
        }

        if let Ok(backoff) = std::env::var("POLL_BACKOFF_SECS") {
            config.poll_backoff_secs = backoff.parse()?;
        }

        if let Ok(buffer) = std::env::var("COPY_BUFFER_BYTES") {
            config.copy_buffer_bytes = buffer.parse()?;
        }

        if let Ok(pause) = std::env::var("INTER_FILE_PAUSE_MS") {
            config.inter_file_pause_ms = pause.parse()?;
        }

        Ok(config)
    }
}

pub fn load_config() -> Result<Config> {
    Config::load()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_tuning() {
        let config = Config::default();
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.poll_backoff_secs, 300);
        assert_eq!(config.copy_buffer_bytes, 8 * 1024);
        assert_eq!(config.inter_file_pause_ms, 300);
    }
}
