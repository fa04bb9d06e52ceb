use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::uploaders::{ChunkedUploader, SimpleUploader};
use super::errors::{Result, UploadError};
use super::ledger::{TaskLedger, Transition};
use super::traits::{NetworkMonitor, TransportAdapter, Uploader};
use super::types::{TaskId, UploadMode, UploadStatus, UploadTask};

/// 一次尝试的结果，由调度器决定后续动作
#[derive(Debug)]
pub enum AttemptOutcome {
    Completed,
    Failed(String),
    /// 用户暂停
    Paused,
    Canceled,
    /// token 被触发但用户没有暂停/取消，已写入 Paused，等待调度器重新排队
    Preempted,
    /// 可重试的失败，状态仍是 Running
    Retry(UploadError),
    /// 没有可用网络，不计入重试
    WaitForNetwork,
    /// 记录已被删除
    Removed,
}

/// 驱动单个任务的一次尝试
pub struct UploadSession {
    pub id: TaskId,
    pub ledger: TaskLedger,
    pub transport: Arc<dyn TransportAdapter>,
    pub network: Arc<dyn NetworkMonitor>,
    pub token: CancellationToken,
    pub progress_interval: Duration,
}

impl UploadSession {
    pub async fn run(&self) -> AttemptOutcome {
        match self.attempt().await {
            Ok(outcome) => outcome,
            Err(UploadError::NotFound(_)) => AttemptOutcome::Removed,
            Err(err) if err.is_retryable() => {
                warn!(task = %self.id, error = %err, "attempt interrupted");
                AttemptOutcome::Retry(err)
            }
            Err(err) => match self.fail(&err).await {
                Ok(outcome) => outcome,
                Err(_) => AttemptOutcome::Failed(err.to_string()),
            },
        }
    }

    async fn attempt(&self) -> Result<AttemptOutcome> {
        let Some(task) = self.ledger.find(&self.id).await? else {
            return Ok(AttemptOutcome::Removed);
        };
        if !matches!(task.status, UploadStatus::Enqueued | UploadStatus::Running) {
            return Ok(Self::outcome_for(&task));
        }

        if self.token.is_cancelled() {
            return self.stopped().await;
        }

        let task = match self.ledger.transition(&self.id, UploadStatus::Running, None).await? {
            Transition::Applied(task) | Transition::Unchanged(task) => task,
            Transition::Rejected(task) => return Ok(Self::outcome_for(&task)),
        };

        let file_size = match tokio::fs::metadata(&task.options.file_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return self.fail(&UploadError::FileMissing(task.options.file_path.clone())).await,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return self.fail(&UploadError::FileMissing(task.options.file_path.clone())).await;
            }
            Err(err) => return Err(err.into()),
        };

        debug!(task = %self.id, mode = ?task.options.mode, file_size, "attempt started");
        match task.options.mode {
            UploadMode::Chunked => ChunkedUploader.run(self, &task, file_size).await,
            UploadMode::Direct => SimpleUploader.run(self, &task, file_size).await,
        }
    }

    /// token 被触发之后，根据记录判断是谁停止了这次尝试
    pub async fn stopped(&self) -> Result<AttemptOutcome> {
        let Some(task) = self.ledger.find(&self.id).await? else {
            return Ok(AttemptOutcome::Removed);
        };
        if !matches!(task.status, UploadStatus::Enqueued | UploadStatus::Running) {
            return Ok(Self::outcome_for(&task));
        }

        match self.ledger.transition(&self.id, UploadStatus::Paused, None).await? {
            Transition::Applied(_) => {
                debug!(task = %self.id, "attempt preempted");
                Ok(AttemptOutcome::Preempted)
            }
            Transition::Unchanged(_) => Ok(AttemptOutcome::Paused),
            Transition::Rejected(task) => Ok(Self::outcome_for(&task)),
        }
    }

    pub async fn complete(&self) -> Result<AttemptOutcome> {
        match self.ledger.transition(&self.id, UploadStatus::Completed, None).await? {
            Transition::Applied(_) | Transition::Unchanged(_) => Ok(AttemptOutcome::Completed),
            Transition::Rejected(task) => Ok(Self::outcome_for(&task)),
        }
    }

    /// 终态失败
    pub async fn fail(&self, err: &UploadError) -> Result<AttemptOutcome> {
        let message = err.to_string();
        warn!(task = %self.id, error = %message, "upload failed");

        match self.ledger.transition(&self.id, UploadStatus::Failed, Some(message.clone())).await? {
            Transition::Applied(_) | Transition::Unchanged(_) => Ok(AttemptOutcome::Failed(message)),
            Transition::Rejected(task) => Ok(Self::outcome_for(&task)),
        }
    }

    /// 按响应状态码分类：2xx 成功，4xx 终态失败，其余重试
    pub async fn classify(&self, response: Result<u16>) -> Result<Option<AttemptOutcome>> {
        let err = match response {
            Ok(status) => match UploadError::from_status(status) {
                None => return Ok(None),
                Some(err) => err,
            },
            Err(err) => err,
        };

        if err.is_retryable() {
            warn!(task = %self.id, error = %err, "send failed, will retry");
            Ok(Some(AttemptOutcome::Retry(err)))
        } else {
            self.fail(&err).await.map(Some)
        }
    }

    /// 当前记录已不再是 Running 时对应的结果
    pub fn outcome_for(task: &UploadTask) -> AttemptOutcome {
        match task.status {
            UploadStatus::Paused => AttemptOutcome::Paused,
            UploadStatus::Canceled => AttemptOutcome::Canceled,
            UploadStatus::Completed => AttemptOutcome::Completed,
            UploadStatus::Failed => AttemptOutcome::Failed(task.error.clone().unwrap_or_default()),
            UploadStatus::Enqueued | UploadStatus::Running => AttemptOutcome::Preempted,
        }
    }
}
