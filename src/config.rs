use crate::error::{SimError, SimResult};
use crate::global_variables::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_COLUMN_WIDTH, DEFAULT_LOG_PATH, DEFAULT_MAX_PAUSE_MS,
    DEFAULT_MAX_QUEUE, DEFAULT_MIN_PAUSE_MS, DEFAULT_RETRY_DELAY_MS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunable settings of a run. Missing fields in a JSON file fall back to
/// the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Vehicles allowed in each before/after queue of a crossing.
    pub max_queue: u32,
    /// Dwell after each granted phase is drawn from
    /// `[min_pause_ms, min_pause_ms + max_pause_ms)`.
    pub min_pause_ms: u64,
    pub max_pause_ms: u64,
    /// Wait between a denial and the resent request.
    pub retry_delay_ms: u64,
    /// Let a denied vehicle resend early when its intersection changes state.
    pub wake_on_state_change: bool,
    pub channel_capacity: usize,
    pub log_path: PathBuf,
    pub log_column_width: usize,
    pub console_output: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_queue: DEFAULT_MAX_QUEUE,
            min_pause_ms: DEFAULT_MIN_PAUSE_MS,
            max_pause_ms: DEFAULT_MAX_PAUSE_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            wake_on_state_change: true,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            log_column_width: DEFAULT_COLUMN_WIDTH,
            console_output: true,
        }
    }
}

impl SimulationConfig {
    pub fn from_file(path: &Path) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        log::info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> SimResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.max_queue == 0 {
            return Err(SimError::Config("max_queue must be at least 1".into()));
        }
        if self.max_pause_ms == 0 {
            return Err(SimError::Config("max_pause_ms must be at least 1".into()));
        }
        if self.channel_capacity == 0 {
            return Err(SimError::Config("channel_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_queue, 1);
        assert_eq!(config.retry_delay(), Duration::from_millis(DEFAULT_RETRY_DELAY_MS));
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = SimulationConfig::from_json(r#"{ "max_queue": 3, "console_output": false }"#)
            .unwrap();
        assert_eq!(config.max_queue, 3);
        assert!(!config.console_output);
        assert_eq!(config.log_column_width, DEFAULT_COLUMN_WIDTH);
    }

    #[test]
    fn zero_queue_is_rejected() {
        let err = SimulationConfig::from_json(r#"{ "max_queue": 0 }"#);
        assert!(matches!(err, Err(SimError::Config(_))));
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = SimulationConfig::from_json("{ max_queue: ");
        assert!(matches!(err, Err(SimError::Json(_))));
    }
}
