use std::path::PathBuf;
use thiserror::Error;
use super::types::{TaskId, UploadStatus};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("File not found: {}", .0.display())]
    FileMissing(PathBuf),

    #[error("Rejected by server: status code {status}")]
    ClientRejected {
        status: u16,
    },

    #[error("Server error: status code {status}")]
    ServerTransient {
        status: u16,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network unavailable")]
    NetworkUnavailable,

    #[error("Cannot move task from {from:?} to {to:?}")]
    InvalidTransition {
        from: UploadStatus,
        to: UploadStatus,
    },

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Scheduler shutdown")]
    SchedulerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 按 HTTP 状态码分类，2xx 返回 None
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            400..=499 => Some(Self::ClientRejected { status }),
            _ => Some(Self::ServerTransient { status }),
        }
    }

    /// 可重试的错误（计入 max_retries）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerTransient { .. } | Self::Transport(_) | Self::Http(_) | Self::Io(_)
        )
    }
}

pub type Result<T, E = UploadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(UploadError::from_status(200).is_none());
        assert!(UploadError::from_status(204).is_none());

        let rejected = UploadError::from_status(404).unwrap();
        assert!(matches!(rejected, UploadError::ClientRejected { status: 404 }));
        assert!(!rejected.is_retryable());

        let transient = UploadError::from_status(503).unwrap();
        assert!(matches!(transient, UploadError::ServerTransient { status: 503 }));
        assert!(transient.is_retryable());

        // 非 2xx/4xx 一律按可重试处理
        assert!(UploadError::from_status(302).unwrap().is_retryable());
    }

    #[test]
    fn test_network_unavailable_is_not_counted() {
        assert!(!UploadError::NetworkUnavailable.is_retryable());
        assert!(!UploadError::FileMissing(PathBuf::from("/nope")).is_retryable());
    }
}
