use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Deserializer};
use crate::core::{QueueError, Result};

// 配置文件中的时长以毫秒表示
fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// Scheduler tuning. Every field has a default, so an empty `[scheduler]`
/// table is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 最大并发上传数
    pub max_concurrent: usize,

    /// 调度循环空闲时的轮询间隔
    #[serde(rename = "idle_poll_interval_ms", deserialize_with = "deserialize_duration")]
    pub idle_poll_interval: Duration,

    /// 连续空闲多少轮后退出调度循环
    pub idle_exit_after: u32,

    /// Uploading progress deltas below this are not published
    pub progress_threshold: f64,

    /// Share of the progress bar owned by the byte transfer
    pub transfer_share: f64,

    /// How long a Completed task stays visible before eviction
    #[serde(rename = "completion_grace_ms", deserialize_with = "deserialize_duration")]
    pub completion_grace: Duration,

    #[serde(rename = "persist_debounce_ms", deserialize_with = "deserialize_duration")]
    pub persist_debounce: Duration,

    /// 持久化目录，None 时不落盘
    pub state_dir: Option<PathBuf>,

    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            idle_poll_interval: Duration::from_millis(200),
            idle_exit_after: 10,
            progress_threshold: 0.05,
            transfer_share: 0.7,
            completion_grace: Duration::from_secs(2),
            persist_debounce: Duration::from_secs(2),
            state_dir: None,
            event_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|err| QueueError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(QueueError::Config("max_concurrent must be at least 1".to_string()));
        }

        if !(0.0..=1.0).contains(&self.transfer_share) {
            return Err(QueueError::Config("transfer_share must be within 0.0..=1.0".to_string()));
        }

        if self.event_capacity == 0 {
            return Err(QueueError::Config("event_capacity must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// Binary configuration: endpoints, credentials and the scheduler table.
#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub storage_endpoint: String,
    pub records_endpoint: String,
    pub token: String,
    pub owner_id: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = toml::from_str(&content).map_err(|err| QueueError::Config(err.to_string()))?;
        config.scheduler.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_uses_defaults() {
        let config = SchedulerConfig::from_toml("").unwrap();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.idle_poll_interval, Duration::from_millis(200));
        assert_eq!(config.persist_debounce, Duration::from_secs(2));
        assert!(config.state_dir.is_none());
    }

    #[test]
    fn test_durations_are_milliseconds() {
        let config = SchedulerConfig::from_toml(
            r#"
            max_concurrent = 5
            completion_grace_ms = 150
            persist_debounce_ms = 50
            state_dir = "/tmp/uploads"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.completion_grace, Duration::from_millis(150));
        assert_eq!(config.persist_debounce, Duration::from_millis(50));
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/uploads")));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        assert!(matches!(
            SchedulerConfig::from_toml("max_concurrent = 0"),
            Err(QueueError::Config(_))
        ));
    }

    #[test]
    fn test_app_config_embeds_scheduler_table() {
        let config: AppConfig = toml::from_str(
            r#"
            storage_endpoint = "https://media.example.com/"
            records_endpoint = "https://api.example.com/posts"
            token = "secret"
            owner_id = "user-1"

            [scheduler]
            max_concurrent = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.max_concurrent, 2);
        assert_eq!(config.scheduler.transfer_share, 0.7);
    }
}
