use std::collections::HashMap;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};
use super::errors::Result;
use super::traits::{Mutation, TaskStore, UpdateOutcome};
use super::types::{TaskId, UploadTask};

/// 内存存储，进程退出即丢失
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, UploadTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get(&self, id: &TaskId) -> Result<Option<UploadTask>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn put(&self, task: &UploadTask) -> Result<()> {
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> Result<bool> {
        Ok(self.tasks.write().await.remove(id).is_some())
    }

    async fn list_all(&self) -> Result<Vec<UploadTask>> {
        let mut tasks: Vec<_> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }

    async fn update(&self, id: &TaskId, mutation: Mutation) -> Result<UpdateOutcome> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(id) else {
            return Ok(UpdateOutcome::Missing);
        };

        let previous = task.status;
        let mut draft = task.clone();
        if mutation(&mut draft) {
            *task = draft.clone();
            Ok(UpdateOutcome::Applied { previous, task: draft })
        } else {
            Ok(UpdateOutcome::Unchanged(task.clone()))
        }
    }
}

/// JSON 文件存储：内存中保存全部记录，每次修改后整体写回文件
pub struct JsonFileTaskStore {
    path: PathBuf,
    tasks: RwLock<HashMap<TaskId, UploadTask>>,
}

impl JsonFileTaskStore {
    /// 打开状态文件，不存在时从空开始
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut tasks = HashMap::new();

        if tokio::fs::try_exists(&path).await? {
            let data = tokio::fs::read_to_string(&path).await?;
            if !data.trim().is_empty() {
                let records: Vec<UploadTask> = serde_json::from_str(&data)?;
                for task in records {
                    tasks.insert(task.id.clone(), task);
                }
            }
            info!(path = %path.display(), count = tasks.len(), "restored upload tasks");
        }

        Ok(Self {
            path,
            tasks: RwLock::new(tasks),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 先写临时文件再 rename，避免写到一半的文件
    async fn save(&self, tasks: &HashMap<TaskId, UploadTask>) -> Result<()> {
        let mut records: Vec<_> = tasks.values().collect();
        records.sort_by_key(|task| task.created_at);
        let data = serde_json::to_string_pretty(&records)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), count = records.len(), "saved upload tasks");

        Ok(())
    }

    /// 写盘成功后才替换内存中的记录，失败时两边保持一致
    async fn commit(
        &self,
        tasks: &mut HashMap<TaskId, UploadTask>,
        next: HashMap<TaskId, UploadTask>,
    ) -> Result<()> {
        self.save(&next).await?;
        *tasks = next;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn get(&self, id: &TaskId) -> Result<Option<UploadTask>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn put(&self, task: &UploadTask) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let mut next = tasks.clone();
        next.insert(task.id.clone(), task.clone());
        self.commit(&mut tasks, next).await
    }

    async fn delete(&self, id: &TaskId) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        if !tasks.contains_key(id) {
            return Ok(false);
        }

        let mut next = tasks.clone();
        next.remove(id);
        self.commit(&mut tasks, next).await?;
        Ok(true)
    }

    async fn list_all(&self) -> Result<Vec<UploadTask>> {
        let mut tasks: Vec<_> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }

    async fn update(&self, id: &TaskId, mutation: Mutation) -> Result<UpdateOutcome> {
        let mut tasks = self.tasks.write().await;
        let Some(current) = tasks.get(id) else {
            return Ok(UpdateOutcome::Missing);
        };

        let mut draft = current.clone();
        if !mutation(&mut draft) {
            return Ok(UpdateOutcome::Unchanged(current.clone()));
        }

        let previous = current.status;
        let mut next = tasks.clone();
        next.insert(id.clone(), draft.clone());
        self.commit(&mut tasks, next).await?;
        Ok(UpdateOutcome::Applied { previous, task: draft })
    }
}
