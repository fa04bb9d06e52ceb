use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;
use super::errors::{Result, UploadError};

/// 上传任务唯一标识，对外是不透明字符串
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 上传状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// 等待中
    Enqueued,
    /// 上传中
    Running,
    /// 已暂停，等待 resume
    Paused,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Canceled,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// 状态机允许的迁移，同状态迁移由调用方按幂等处理
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;

        match (self, next) {
            (Enqueued, Running | Paused | Canceled) => true,
            (Running, Paused | Completed | Failed | Canceled) => true,
            (Paused, Enqueued | Running | Canceled) => true,
            // 调用方可以重新激活失败的任务
            (Failed, Enqueued) => true,
            _ => false,
        }
    }
}

/// 上传模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// 整个文件一次请求
    #[default]
    Direct,
    /// 分片上传
    Chunked,
}

fn default_chunk_size() -> u64 {
    1024 * 1024 // 1MB
}

fn default_parallel_uploads() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

/// 任务创建时确定的配置，之后不再改变
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UploadOptions {
    pub file_path: PathBuf,
    pub endpoint: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 单个任务内同时发送的分片数
    #[serde(default = "default_parallel_uploads")]
    pub max_parallel_uploads: usize,
    /// 没有可用网络时推迟上传
    #[serde(default = "default_true")]
    pub adaptive_network: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub show_notification: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 额外的表单字段，原样附加到每个请求
    #[serde(default)]
    pub extra_fields: HashMap<String, String>,
    #[serde(default)]
    pub mode: UploadMode,
}

impl UploadOptions {
    pub fn new(file_path: impl Into<PathBuf>, endpoint: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            endpoint: endpoint.into(),
            chunk_size: default_chunk_size(),
            max_parallel_uploads: default_parallel_uploads(),
            adaptive_network: true,
            max_retries: default_max_retries(),
            show_notification: true,
            headers: HashMap::new(),
            extra_fields: HashMap::new(),
            mode: UploadMode::Direct,
        }
    }

    pub fn chunked(mut self, chunk_size: u64) -> Self {
        self.mode = UploadMode::Chunked;
        self.chunk_size = chunk_size;
        self
    }

    pub fn direct(mut self) -> Self {
        self.mode = UploadMode::Direct;
        self
    }

    pub fn max_parallel_uploads(mut self, parallel: usize) -> Self {
        self.max_parallel_uploads = parallel;
        self
    }

    pub fn adaptive_network(mut self, enabled: bool) -> Self {
        self.adaptive_network = enabled;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn show_notification(mut self, enabled: bool) -> Self {
        self.show_notification = enabled;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_fields.insert(name.into(), value.into());
        self
    }

    /// 复用同一份配置上传另一个文件
    pub fn for_file(&self, file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            ..self.clone()
        }
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// 创建任务前校验，失败的配置不会被持久化
    pub fn validate(&self) -> Result<()> {
        if self.file_path.file_name().is_none() {
            return Err(UploadError::invalid_config("file_path must name a file"));
        }

        let url = Url::parse(&self.endpoint)
            .map_err(|err| UploadError::invalid_config(format!("endpoint {}: {}", self.endpoint, err)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UploadError::invalid_config(format!(
                "endpoint scheme must be http or https, got {}",
                url.scheme()
            )));
        }

        if self.chunk_size == 0 {
            return Err(UploadError::invalid_config("chunk_size must be greater than 0"));
        }

        if self.max_parallel_uploads == 0 {
            return Err(UploadError::invalid_config("max_parallel_uploads must be at least 1"));
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| UploadError::invalid_config(format!("header {}: {}", name, err)))?;
            HeaderValue::from_str(value)
                .map_err(|err| UploadError::invalid_config(format!("header {}: {}", name, err)))?;
        }

        Ok(())
    }
}

/// 上传任务，TaskStore 中的持久化记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    /// 任务 ID
    pub id: TaskId,
    /// 创建时的配置
    pub options: UploadOptions,
    /// 当前状态
    pub status: UploadStatus,
    /// 0 - 100
    #[serde(default)]
    pub progress: u8,
    /// 已上传的分片（仅分片模式）
    #[serde(default)]
    pub uploaded_chunks: BTreeSet<u64>,
    /// 字节/秒
    #[serde(default)]
    pub speed: f64,
    /// 预计剩余秒数
    #[serde(default)]
    pub eta: Option<u64>,
    /// 连续可重试失败次数
    #[serde(default)]
    pub retry_count: u32,
    /// 错误信息
    #[serde(default)]
    pub error: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 第一次进入 Running 的时间
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// 进入终态的时间
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadTask {
    pub fn new(id: TaskId, options: UploadOptions) -> Self {
        Self {
            id,
            options,
            status: UploadStatus::Enqueued,
            progress: 0,
            uploaded_chunks: BTreeSet::new(),
            speed: 0.0,
            eta: None,
            retry_count: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 从第一次开始上传到 now 的时长
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        self.started_at
            .and_then(|started| (now - started).to_std().ok())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            speed: self.speed,
            eta: self.eta,
            error_message: self.error.clone(),
        }
    }
}

/// 对外暴露的任务快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: UploadStatus,
    pub progress: u8,
    pub speed: f64,
    pub eta: Option<u64>,
    pub error_message: Option<String>,
}

/// 上传事件，每次成功写入 TaskStore 发布一次
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// 任务状态变更
    StateChanged {
        old_status: UploadStatus,
        snapshot: TaskSnapshot,
    },

    /// 进度更新
    Progress(TaskSnapshot),

    /// 任务记录已删除
    Removed {
        task_id: TaskId,
    },
}

impl UploadEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::StateChanged { snapshot, .. } => &snapshot.task_id,
            Self::Progress(snapshot) => &snapshot.task_id,
            Self::Removed { task_id } => task_id,
        }
    }

    pub fn snapshot(&self) -> Option<&TaskSnapshot> {
        match self {
            Self::StateChanged { snapshot, .. } => Some(snapshot),
            Self::Progress(snapshot) => Some(snapshot),
            Self::Removed { .. } => None,
        }
    }
}

// 静态断言确保类型是 Send的
const _: () = {
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn assert_types() {
        assert_send::<UploadTask>();
        assert_send::<UploadEvent>();
        assert_send::<TaskSnapshot>();
    }
};
