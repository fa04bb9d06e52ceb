use std::sync::Arc;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use crate::utils::{estimate, percent};
use super::errors::{Result, UploadError};
use super::traits::{Notifier, TaskStore, UpdateOutcome};
use super::types::{TaskId, UploadEvent, UploadStatus, UploadTask};

/// 状态迁移结果
#[derive(Debug, Clone)]
pub enum Transition {
    /// 已写入
    Applied(UploadTask),
    /// 已经处于目标状态
    Unchanged(UploadTask),
    /// 状态机不允许，返回当前记录
    Rejected(UploadTask),
}

impl Transition {
    pub fn task(&self) -> &UploadTask {
        match self {
            Self::Applied(task) | Self::Unchanged(task) | Self::Rejected(task) => task,
        }
    }
}

/// 分片记录结果
#[derive(Debug, Clone)]
pub enum ChunkRecord {
    /// 已在记录中（新写入或重复）
    Recorded(UploadTask),
    /// 任务已进入终态，不再接受分片
    Ignored(UploadTask),
    /// 记录已被删除
    Missing,
}

/// TaskStore 的唯一写入口
///
/// 每次成功写入发布一个事件；进入终态时（开启通知的任务）调用一次 on_terminal。
#[derive(Clone)]
pub struct TaskLedger {
    store: Arc<dyn TaskStore>,
    events: broadcast::Sender<UploadEvent>,
    notifier: Arc<dyn Notifier>,
}

impl TaskLedger {
    pub fn new(
        store: Arc<dyn TaskStore>,
        events: broadcast::Sender<UploadEvent>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { store, events, notifier }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    pub async fn find(&self, id: &TaskId) -> Result<Option<UploadTask>> {
        self.store.get(id).await
    }

    pub async fn load(&self, id: &TaskId) -> Result<UploadTask> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| UploadError::NotFound(id.clone()))
    }

    pub async fn list(&self) -> Result<Vec<UploadTask>> {
        self.store.list_all().await
    }

    /// 保存新任务
    pub async fn create(&self, task: UploadTask) -> Result<()> {
        self.store.put(&task).await?;
        info!(task = %task.id, file = %task.options.file_path.display(), mode = ?task.options.mode, "task created");

        self.publish(UploadEvent::StateChanged {
            old_status: task.status,
            snapshot: task.snapshot(),
        });
        Ok(())
    }

    /// 按状态机迁移状态
    ///
    /// Canceled 没有出边，所以任何迁移都不会覆盖它。
    pub async fn transition(&self, id: &TaskId, to: UploadStatus, error: Option<String>) -> Result<Transition> {
        let outcome = self.store
            .update(id, Box::new(move |task| {
                if !task.status.can_transition_to(to) {
                    return false;
                }

                let now = Utc::now();
                task.status = to;
                match to {
                    UploadStatus::Running => {
                        if task.started_at.is_none() {
                            task.started_at = Some(now);
                        }
                    }
                    UploadStatus::Enqueued => {
                        // 重新排队是一次新的开始
                        task.retry_count = 0;
                        task.error = None;
                        task.completed_at = None;
                    }
                    UploadStatus::Completed => {
                        task.progress = 100;
                        task.eta = Some(0);
                        task.error = None;
                        task.completed_at = Some(now);
                    }
                    UploadStatus::Failed | UploadStatus::Canceled => {
                        task.error = error;
                        task.completed_at = Some(now);
                    }
                    UploadStatus::Paused => {}
                }
                true
            }))
            .await?;

        match outcome {
            UpdateOutcome::Missing => Err(UploadError::NotFound(id.clone())),
            UpdateOutcome::Unchanged(task) if task.status == to => Ok(Transition::Unchanged(task)),
            UpdateOutcome::Unchanged(task) => {
                debug!(task = %id, from = ?task.status, to = ?to, "transition rejected");
                Ok(Transition::Rejected(task))
            }
            UpdateOutcome::Applied { previous, task } => {
                info!(task = %id, from = ?previous, to = ?to, "status changed");
                self.publish(UploadEvent::StateChanged {
                    old_status: previous,
                    snapshot: task.snapshot(),
                });

                if to.is_terminal() && task.options.show_notification {
                    self.notifier
                        .on_terminal(&task.id, to, task.error.as_deref())
                        .await;
                }

                Ok(Transition::Applied(task))
            }
        }
    }

    /// 记录一个已确认的分片（集合并），重算进度、速度和 ETA
    pub async fn record_chunk(&self, id: &TaskId, index: u64, total_chunks: u64, file_size: u64) -> Result<ChunkRecord> {
        if index >= total_chunks {
            warn!(task = %id, chunk = index, total_chunks, "chunk index out of range");
            return match self.store.get(id).await? {
                Some(task) => Ok(ChunkRecord::Ignored(task)),
                None => Ok(ChunkRecord::Missing),
            };
        }

        let outcome = self.store
            .update(id, Box::new(move |task| {
                if task.status.is_terminal() || !task.uploaded_chunks.insert(index) {
                    return false;
                }

                let uploaded = task.uploaded_chunks.len() as u64;
                let moved = uploaded.saturating_mul(task.options.chunk_size);
                let throughput = estimate(moved, file_size, task.elapsed(Utc::now()));

                task.progress = percent(uploaded, total_chunks);
                task.speed = throughput.speed;
                task.eta = throughput.eta;
                task.retry_count = 0;
                true
            }))
            .await?;

        match outcome {
            UpdateOutcome::Missing => Ok(ChunkRecord::Missing),
            UpdateOutcome::Unchanged(task) if task.status.is_terminal() => {
                debug!(task = %id, chunk = index, status = ?task.status, "late chunk ignored");
                Ok(ChunkRecord::Ignored(task))
            }
            // 重复记录
            UpdateOutcome::Unchanged(task) => Ok(ChunkRecord::Recorded(task)),
            UpdateOutcome::Applied { task, .. } => {
                debug!(task = %id, chunk = index, progress = task.progress, "chunk recorded");
                self.publish_progress(&task).await;
                Ok(ChunkRecord::Recorded(task))
            }
        }
    }

    /// 整文件模式的字节进度，响应到达前最多 99，且不回退
    pub async fn record_bytes(&self, id: &TaskId, sent: u64, total: u64) -> Result<()> {
        let outcome = self.store
            .update(id, Box::new(move |task| {
                if task.status != UploadStatus::Running {
                    return false;
                }

                let throughput = estimate(sent, total, task.elapsed(Utc::now()));
                task.progress = task.progress.max(percent(sent, total).min(99));
                task.speed = throughput.speed;
                task.eta = throughput.eta;
                true
            }))
            .await?;

        if let UpdateOutcome::Applied { task, .. } = outcome {
            self.publish_progress(&task).await;
        }
        Ok(())
    }

    /// 去掉超出范围的分片索引（文件变小之后）
    pub async fn prune_chunks(&self, id: &TaskId, total_chunks: u64) -> Result<()> {
        let outcome = self.store
            .update(id, Box::new(move |task| {
                let before = task.uploaded_chunks.len();
                task.uploaded_chunks.retain(|index| *index < total_chunks);
                if task.uploaded_chunks.len() == before {
                    return false;
                }

                task.progress = percent(task.uploaded_chunks.len() as u64, total_chunks);
                true
            }))
            .await?;

        if let UpdateOutcome::Applied { task, .. } = outcome {
            warn!(task = %id, total_chunks, kept = task.uploaded_chunks.len(), "pruned out-of-range chunks");
            self.publish(UploadEvent::Progress(task.snapshot()));
        }
        Ok(())
    }

    /// 累加一次可重试失败；任务不在 Running 时返回 None
    pub async fn bump_retry(&self, id: &TaskId) -> Result<Option<UploadTask>> {
        let outcome = self.store
            .update(id, Box::new(|task| {
                if task.status != UploadStatus::Running {
                    return false;
                }
                task.retry_count = task.retry_count.saturating_add(1);
                true
            }))
            .await?;

        match outcome {
            UpdateOutcome::Applied { task, .. } => {
                debug!(task = %id, retry_count = task.retry_count, "retry counted");
                self.publish(UploadEvent::Progress(task.snapshot()));
                Ok(Some(task))
            }
            _ => Ok(None),
        }
    }

    /// 删除记录，返回记录是否存在
    pub async fn remove(&self, id: &TaskId) -> Result<bool> {
        let existed = self.store.delete(id).await?;
        if existed {
            info!(task = %id, "task removed");
            self.publish(UploadEvent::Removed { task_id: id.clone() });
        }
        Ok(existed)
    }

    async fn publish_progress(&self, task: &UploadTask) {
        self.publish(UploadEvent::Progress(task.snapshot()));
        if task.options.show_notification {
            self.notifier
                .on_progress(&task.id, task.progress, task.speed, task.eta)
                .await;
        }
    }

    fn publish(&self, event: UploadEvent) {
        // 没有订阅者时发送失败，忽略
        let _ = self.events.send(event);
    }
}
