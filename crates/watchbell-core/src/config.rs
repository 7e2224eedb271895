//! Watchbell configuration system.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WatchbellError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchbellConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub audience: AudienceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

impl WatchbellConfig {
    /// Load config from the default path (~/.watchbell/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::info!("📄 No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WatchbellError::Config(format!("Failed to read config: {e}")))?;
        let config = Self::from_toml(&content).inspect_err(|e| {
            tracing::error!("❌ Rejected config {}: {e}", path.display());
        })?;
        tracing::info!("📄 Loaded config from {}", path.display());
        tracing::debug!(
            "⚙️ storage={} test_mode={} max_attempts={}",
            config.storage.backend,
            config.scheduler.test_mode,
            config.cooldown.max_attempts
        );
        Ok(config)
    }

    /// Parse config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| WatchbellError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| WatchbellError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        tracing::debug!("💾 Wrote config to {}", path.display());
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cooldown.max_attempts == 0 {
            return Err(WatchbellError::config("cooldown.max_attempts must be at least 1"));
        }
        if self.audience.default_max_mentions == 0 {
            return Err(WatchbellError::config(
                "audience.default_max_mentions must be at least 1",
            ));
        }
        if let Some((group, _)) = self
            .audience
            .group_max_mentions
            .iter()
            .find(|(_, cap)| **cap == 0)
        {
            return Err(WatchbellError::config(format!(
                "audience.group_max_mentions.{group} must be at least 1"
            )));
        }
        if self.scheduler.min_wait_secs == 0 {
            return Err(WatchbellError::config("scheduler.min_wait_secs must be at least 1"));
        }
        if self.scheduler.min_wait() > self.scheduler.max_wait() {
            return Err(WatchbellError::config(format!(
                "scheduler.min_wait_secs must not exceed the {}s max wait",
                self.scheduler.max_wait().as_secs()
            )));
        }
        let bounded = [
            ("scheduler.safety_margin_secs", self.scheduler.safety_margin()),
            ("scheduler.retry_delay_secs", self.scheduler.retry_delay()),
            ("scheduler.failure_backoff_secs", self.scheduler.failure_backoff()),
            ("scheduler.inter_item_delay_ms", self.scheduler.inter_item_delay()),
            ("cooldown.window_secs", self.cooldown.window()),
            ("notify.timeout_secs", self.notify.timeout()),
        ];
        if let Some((key, _)) = bounded.iter().find(|(_, d)| *d > MAX_CONFIGURED_DURATION) {
            return Err(WatchbellError::config(format!(
                "{key} must be at most {}s",
                MAX_CONFIGURED_DURATION.as_secs()
            )));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Watchbell home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".watchbell")
    }
}

/// Scheduling engine timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Shorter max wait, for verification runs.
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,
    #[serde(default = "default_min_wait_secs")]
    pub min_wait_secs: u64,
    /// Pause between items of one batch (downstream rate limits).
    #[serde(default = "default_inter_item_delay_ms")]
    pub inter_item_delay_ms: u64,
    /// Fixed delay before retrying after a failed scheduling pass.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// How long a failed item waits before the engine looks at it again.
    #[serde(default = "default_failure_backoff_secs")]
    pub failure_backoff_secs: u64,
}

fn default_safety_margin_secs() -> u64 { 5 }
fn default_min_wait_secs() -> u64 { 5 }
fn default_inter_item_delay_ms() -> u64 { 1000 }
fn default_retry_delay_secs() -> u64 { 60 }
fn default_failure_backoff_secs() -> u64 { 60 }

const MAX_WAIT_NORMAL_SECS: u64 = 30 * 60;
/// Ceiling for every configured delay or window: 30 days.
const MAX_CONFIGURED_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const MAX_WAIT_TEST_SECS: u64 = 5 * 60;

impl SchedulerConfig {
    /// Upper bound on a single sleep: 5 minutes in test mode, 30 otherwise.
    pub fn max_wait(&self) -> Duration {
        if self.test_mode {
            Duration::from_secs(MAX_WAIT_TEST_SECS)
        } else {
            Duration::from_secs(MAX_WAIT_NORMAL_SECS)
        }
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.safety_margin_secs)
    }

    pub fn min_wait(&self) -> Duration {
        Duration::from_secs(self.min_wait_secs)
    }

    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_secs(self.failure_backoff_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            test_mode: false,
            safety_margin_secs: default_safety_margin_secs(),
            min_wait_secs: default_min_wait_secs(),
            inter_item_delay_ms: default_inter_item_delay_ms(),
            retry_delay_secs: default_retry_delay_secs(),
            failure_backoff_secs: default_failure_backoff_secs(),
        }
    }
}

/// Per-item failure circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_attempts() -> u32 { 5 }
fn default_window_secs() -> u64 { 300 }

impl CooldownConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_secs: default_window_secs(),
        }
    }
}

/// Mention caps for targeted reminders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceConfig {
    #[serde(default = "default_max_mentions")]
    pub default_max_mentions: usize,
    /// Per-group override, keyed by group id.
    #[serde(default)]
    pub group_max_mentions: HashMap<String, usize>,
}

fn default_max_mentions() -> usize { 50 }

impl AudienceConfig {
    /// Mention cap for a group.
    pub fn max_mentions_for(&self, group_id: &str) -> usize {
        self.group_max_mentions
            .get(group_id)
            .copied()
            .unwrap_or(self.default_max_mentions)
    }
}

impl Default for AudienceConfig {
    fn default() -> Self {
        Self {
            default_max_mentions: default_max_mentions(),
            group_max_mentions: HashMap::new(),
        }
    }
}

/// Where watched items are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `sqlite`, `json`, or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_backend() -> String { "sqlite".into() }
fn default_storage_path() -> String { "~/.watchbell/watchbell.db".into() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

/// Outbound notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// When unset, reminders are only logged.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_notify_timeout_secs() -> u64 { 10 }

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            headers: Vec::new(),
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

/// Static membership and acknowledgement data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Container id → user ids with access.
    #[serde(default)]
    pub members: HashMap<String, Vec<String>>,
    /// Item id → user ids that acknowledged.
    #[serde(default)]
    pub responders: HashMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WatchbellConfig::default();
        assert_eq!(config.scheduler.safety_margin(), Duration::from_secs(5));
        assert_eq!(config.scheduler.min_wait(), Duration::from_secs(5));
        assert_eq!(config.scheduler.max_wait(), Duration::from_secs(30 * 60));
        assert_eq!(config.cooldown.max_attempts, 5);
        assert_eq!(config.cooldown.window(), Duration::from_secs(300));
        assert_eq!(config.storage.backend, "sqlite");
    }

    #[test]
    fn test_test_mode_max_wait() {
        let config = SchedulerConfig {
            test_mode: true,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.max_wait(), Duration::from_secs(5 * 60));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = WatchbellConfig::from_toml(
            r#"
            [scheduler]
            test_mode = true
            inter_item_delay_ms = 0

            [audience]
            default_max_mentions = 20
            group_max_mentions = { "guild-9" = 3 }

            [directory.members]
            "chan-1" = ["alice", "bob"]
            "#,
        )
        .unwrap();
        assert!(config.scheduler.test_mode);
        assert_eq!(config.scheduler.inter_item_delay_ms, 0);
        assert_eq!(config.scheduler.retry_delay_secs, 60);
        assert_eq!(config.audience.max_mentions_for("guild-9"), 3);
        assert_eq!(config.audience.max_mentions_for("guild-1"), 20);
        assert_eq!(config.directory.members["chan-1"].len(), 2);
    }

    #[test]
    fn test_rejects_zero_caps() {
        assert!(WatchbellConfig::from_toml("[cooldown]\nmax_attempts = 0\n").is_err());
        assert!(WatchbellConfig::from_toml("[audience]\ndefault_max_mentions = 0\n").is_err());
    }

    #[test]
    fn test_rejects_out_of_range_durations() {
        // Largest integer TOML can carry.
        let huge = i64::MAX;
        for (toml, key) in [
            (format!("[cooldown]\nwindow_secs = {huge}\n"), "window_secs"),
            (format!("[scheduler]\nfailure_backoff_secs = {huge}\n"), "failure_backoff"),
            (format!("[scheduler]\nretry_delay_secs = {huge}\n"), "retry_delay"),
            (format!("[scheduler]\nsafety_margin_secs = {huge}\n"), "safety_margin"),
            (format!("[scheduler]\ninter_item_delay_ms = {huge}\n"), "inter_item"),
            ("[scheduler]\nmin_wait_secs = 3600\n".to_string(), "min_wait"),
            ("[scheduler]\ntest_mode = true\nmin_wait_secs = 600\n".to_string(), "min_wait"),
        ] {
            let err = WatchbellConfig::from_toml(&toml).unwrap_err();
            assert!(matches!(err, WatchbellError::Config(_)), "{toml}");
            assert!(err.to_string().contains(key), "{err}");
        }

        let week = WatchbellConfig::from_toml("[cooldown]\nwindow_secs = 604800\n").unwrap();
        assert_eq!(week.cooldown.window(), Duration::from_secs(604_800));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = WatchbellConfig::default();
        config.notify.webhook_url = Some("https://hooks.example.com/r".into());
        config.save_to(&path).unwrap();

        let loaded = WatchbellConfig::load_from(&path).unwrap();
        assert_eq!(
            loaded.notify.webhook_url.as_deref(),
            Some("https://hooks.example.com/r")
        );
    }
}
