//! Configuration parsing for the relay lap counter.
//!
//! Settings come from a single JSON file. Every field is optional; the
//! `effective_*` accessors apply the defaults, and the runner's command-line
//! flags override the file where both are given.
//!
//! # Example config
//!
//! ```json
//! {
//!   "relay": { "module_name": "relay", "log_path": "/var/log/relay" },
//!   "listen_addr": "0.0.0.0:8080",
//!   "journal_path": "journal.csv",
//!   "journal_flush_threshold": 2,
//!   "min_lap_interval_secs": 60,
//!   "intake_capacity": 64,
//!   "hub": { "queue_capacity": 10, "overflow": "drop_oldest" },
//!   "hours": { "start_hour": 0, "start_in_secs": 0, "tick_secs": 3600 }
//! }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::RelayError;
use crate::types::HOURS_PER_EVENT;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_JOURNAL_PATH: &str = "journal.csv";
pub const DEFAULT_FLUSH_THRESHOLD: usize = 2;
pub const DEFAULT_MIN_LAP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_INTAKE_CAPACITY: usize = 64;
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 10;
/// Upper bound for the intake and subscriber queue capacities.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 16;
pub const DEFAULT_TICK_SECS: u64 = 3600;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    pub relay: Option<ModuleMeta>,

    /// Websocket listen address for the gateways.
    pub listen_addr: Option<String>,

    /// Journal file. Replayed at startup when it exists.
    pub journal_path: Option<PathBuf>,

    /// Buffered journal records that trigger a flush.
    pub journal_flush_threshold: Option<usize>,

    /// Minimum seconds between two accepted reads of one tag.
    pub min_lap_interval_secs: Option<u64>,

    /// Capacity of the shared tag-read intake queue.
    pub intake_capacity: Option<usize>,

    /// Notification hub settings.
    pub hub: HubConfig,

    /// Hour source settings.
    pub hours: HoursConfig,
}

/// Module metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

/// What the hub does when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Overwrite the oldest queued notification.
    #[default]
    DropOldest,
    /// Drop the subscriber; its delivery task ends.
    Disconnect,
}

/// Notification hub settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Per-subscriber queue capacity (default: 10).
    pub queue_capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl HubConfig {
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or(DEFAULT_SUBSCRIBER_CAPACITY)
            .clamp(1, MAX_QUEUE_CAPACITY)
    }
}

/// Hour source settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HoursConfig {
    /// Hour delivered first, for restarts in the middle of an event.
    pub start_hour: Option<u8>,
    /// Delay before the event starts.
    pub start_in_secs: Option<u64>,
    /// Length of one event hour (shortened for rehearsals).
    pub tick_secs: Option<u64>,
}

impl HoursConfig {
    pub fn effective_start_hour(&self) -> u8 {
        self.start_hour.unwrap_or(0)
    }

    pub fn start_in(&self) -> Duration {
        Duration::from_secs(self.start_in_secs.unwrap_or(0))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.unwrap_or(DEFAULT_TICK_SECS))
    }
}

impl AppConfig {
    /// Returns the module name, defaulting to `"relay"`.
    pub fn module_name(&self) -> String {
        self.relay
            .as_ref()
            .and_then(|m| m.module_name.clone())
            .unwrap_or_else(|| "relay".to_string())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.relay.as_ref().and_then(|m| m.log_path.clone())
    }

    pub fn effective_listen_addr(&self) -> Result<SocketAddr, RelayError> {
        let raw = self.listen_addr.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR);
        raw.parse()
            .map_err(|e| RelayError::Config(format!("listen_addr {raw:?}: {e}")))
    }

    pub fn effective_journal_path(&self) -> PathBuf {
        self.journal_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_JOURNAL_PATH))
    }

    pub fn effective_flush_threshold(&self) -> usize {
        self.journal_flush_threshold.unwrap_or(DEFAULT_FLUSH_THRESHOLD)
    }

    pub fn min_lap_interval(&self) -> Duration {
        Duration::from_secs(self.min_lap_interval_secs.unwrap_or(DEFAULT_MIN_LAP_INTERVAL_SECS))
    }

    pub fn effective_intake_capacity(&self) -> usize {
        self.intake_capacity
            .unwrap_or(DEFAULT_INTAKE_CAPACITY)
            .clamp(1, MAX_QUEUE_CAPACITY)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), RelayError> {
        self.effective_listen_addr()?;
        if self.effective_flush_threshold() == 0 {
            return Err(RelayError::Config("journal_flush_threshold must be at least 1".into()));
        }
        if self.hours.effective_start_hour() as usize >= HOURS_PER_EVENT {
            return Err(RelayError::Config(format!(
                "hours.start_hour must be below {HOURS_PER_EVENT}"
            )));
        }
        for (key, value) in [
            ("intake_capacity", self.intake_capacity),
            ("hub.queue_capacity", self.hub.queue_capacity),
        ] {
            if matches!(value, Some(n) if n == 0 || n > MAX_QUEUE_CAPACITY) {
                return Err(RelayError::Config(format!(
                    "{key} must be between 1 and {MAX_QUEUE_CAPACITY}"
                )));
            }
        }
        if self.hours.tick().is_zero() {
            return Err(RelayError::Config("hours.tick_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.module_name(), "relay");
        assert_eq!(cfg.effective_listen_addr().unwrap().port(), 8080);
        assert_eq!(cfg.effective_journal_path(), PathBuf::from("journal.csv"));
        assert_eq!(cfg.effective_flush_threshold(), 2);
        assert_eq!(cfg.min_lap_interval(), Duration::from_secs(60));
        assert_eq!(cfg.hub.effective_queue_capacity(), 10);
        assert_eq!(cfg.hub.overflow, OverflowPolicy::DropOldest);
        assert_eq!(cfg.hours.tick(), Duration::from_secs(3600));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn full_config() {
        let json = r#"{
            "relay": { "module_name": "relay_2026", "log_path": "/tmp/log" },
            "listen_addr": "127.0.0.1:9000",
            "journal_path": "/data/journal.csv",
            "journal_flush_threshold": 5,
            "min_lap_interval_secs": 2,
            "intake_capacity": 16,
            "hub": { "queue_capacity": 32, "overflow": "disconnect" },
            "hours": { "start_hour": 3, "start_in_secs": 120, "tick_secs": 60 }
        }"#;
        let cfg: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.module_name(), "relay_2026");
        assert_eq!(cfg.log_path().as_deref(), Some("/tmp/log"));
        assert_eq!(cfg.effective_listen_addr().unwrap().to_string(), "127.0.0.1:9000");
        assert_eq!(cfg.effective_flush_threshold(), 5);
        assert_eq!(cfg.min_lap_interval(), Duration::from_secs(2));
        assert_eq!(cfg.effective_intake_capacity(), 16);
        assert_eq!(cfg.hub.effective_queue_capacity(), 32);
        assert_eq!(cfg.hub.overflow, OverflowPolicy::Disconnect);
        assert_eq!(cfg.hours.effective_start_hour(), 3);
        assert_eq!(cfg.hours.start_in(), Duration::from_secs(120));
        assert_eq!(cfg.hours.tick(), Duration::from_secs(60));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cfg: AppConfig = serde_json::from_str(r#"{"journal_flush_threshold": 0}"#).unwrap();
        assert!(cfg.validate().is_err());

        let cfg: AppConfig = serde_json::from_str(r#"{"hours": {"start_hour": 24}}"#).unwrap();
        assert!(cfg.validate().is_err());

        let cfg: AppConfig = serde_json::from_str(r#"{"listen_addr": "nowhere"}"#).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn queue_capacities_are_bounded() {
        let json = format!(r#"{{"hub": {{"queue_capacity": {}}}}}"#, usize::MAX);
        let cfg: AppConfig = serde_json::from_str(&json).unwrap();
        assert!(cfg.validate().is_err());
        assert_eq!(cfg.hub.effective_queue_capacity(), MAX_QUEUE_CAPACITY);

        let cfg: AppConfig = serde_json::from_str(r#"{"intake_capacity": 0}"#).unwrap();
        assert!(cfg.validate().is_err());
        assert_eq!(cfg.effective_intake_capacity(), 1);

        let json = format!(r#"{{"hub": {{"queue_capacity": {MAX_QUEUE_CAPACITY}}}}}"#);
        let cfg: AppConfig = serde_json::from_str(&json).unwrap();
        assert!(cfg.validate().is_ok());
    }
}
