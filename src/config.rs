use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use crate::core::{Result, UploadError, UploadOptions};

/// 调度器配置，时长以毫秒书写
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 同时运行的任务数
    pub max_concurrent_tasks: usize,
    #[serde(with = "duration_millis")]
    pub retry_base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub retry_max_delay: Duration,
    /// 没有网络时多久后再试
    #[serde(with = "duration_millis")]
    pub network_retry_delay: Duration,
    /// 整文件模式进度写入间隔
    #[serde(with = "duration_millis")]
    pub progress_interval: Duration,
    pub event_capacity: usize,
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    /// 为空时使用内存存储
    pub state_file: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            retry_base_delay: Duration::from_secs(10),
            retry_max_delay: Duration::from_secs(5 * 60),
            network_retry_delay: Duration::from_secs(30),
            progress_interval: Duration::from_millis(500),
            // 最大缓存 256 个事件
            event_capacity: 256,
            request_timeout: Duration::from_secs(30),
            state_file: None,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(UploadError::invalid_config("max_concurrent_tasks must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(UploadError::invalid_config("event_capacity must be at least 1"));
        }
        if self.retry_max_delay < self.retry_base_delay {
            return Err(UploadError::invalid_config("retry_max_delay must not be less than retry_base_delay"));
        }
        Ok(())
    }
}

/// config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub uploads: Vec<UploadOptions>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        for upload in &self.uploads {
            upload.validate()?;
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
