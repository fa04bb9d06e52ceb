use std::time::Duration;
use async_trait::async_trait;
use tracing::{info, warn};
use crate::utils::{format_duration, format_speed};
use super::traits::Notifier;
use super::types::{TaskId, UploadStatus};

/// 不做任何通知
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn on_progress(&self, _task_id: &TaskId, _progress: u8, _speed: f64, _eta: Option<u64>) {}

    async fn on_terminal(&self, _task_id: &TaskId, _status: UploadStatus, _error: Option<&str>) {}
}

/// 把通知写到日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn on_progress(&self, task_id: &TaskId, progress: u8, speed: f64, eta: Option<u64>) {
        let eta = eta
            .map(|secs| format_duration(Duration::from_secs(secs)))
            .unwrap_or_else(|| "--".to_string());

        info!(
            task = %task_id,
            "{}% - {} - ETA {}",
            progress,
            format_speed(speed),
            eta
        );
    }

    async fn on_terminal(&self, task_id: &TaskId, status: UploadStatus, error: Option<&str>) {
        match status {
            UploadStatus::Completed => info!(task = %task_id, "upload completed"),
            UploadStatus::Canceled => info!(task = %task_id, "upload canceled"),
            _ => warn!(task = %task_id, status = ?status, error = error.unwrap_or("unknown"), "upload failed"),
        }
    }
}
