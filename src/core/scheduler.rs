use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use crate::config::SchedulerConfig;
use crate::uploaders::MultipartTransport;
use super::errors::{Result, UploadError};
use super::ledger::TaskLedger;
use super::network::AlwaysOnline;
use super::notify::NoopNotifier;
use super::scheduler_worker::SchedulerWorker;
use super::store::MemoryTaskStore;
use super::traits::{NetworkMonitor, Notifier, TaskStore, TransportAdapter};
use super::types::{TaskId, TaskSnapshot, UploadEvent, UploadOptions};

type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum SchedulerCommand {
    Submit {
        options: UploadOptions,
        reply: Reply<TaskId>,
    },
    SubmitBatch {
        files: Vec<PathBuf>,
        template: UploadOptions,
        reply: Reply<Vec<TaskId>>,
    },
    Pause {
        task_id: TaskId,
        reply: Reply<()>,
    },
    Resume {
        task_id: TaskId,
        reply: Reply<()>,
    },
    Cancel {
        task_id: TaskId,
        reply: Reply<()>,
    },
    Remove {
        task_id: TaskId,
        reply: Reply<()>,
    },
    Get {
        task_id: TaskId,
        reply: Reply<TaskSnapshot>,
    },
    List {
        reply: Reply<Vec<TaskSnapshot>>,
    },
    NetworkChanged {
        usable: bool,
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// 调度器句柄，可以随意 clone
#[derive(Clone)]
pub struct Scheduler {
    command_tx: mpsc::Sender<SchedulerCommand>,
    event_tx: broadcast::Sender<UploadEvent>,
}

/// 调度器句柄 - 包含调度器和工作线程
pub struct SchedulerHandle {
    pub scheduler: Scheduler,
    pub worker_handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// 停止所有尝试并等待工作线程退出
    pub async fn shutdown(self) -> Result<()> {
        // 工作线程可能已经退出
        let _ = self.scheduler.shutdown().await;
        drop(self.scheduler);

        self.worker_handle
            .await
            .map_err(|err| UploadError::internal(format!("Worker panic: {}", err)))
    }
}

pub struct SchedulerBuilder {
    config: SchedulerConfig,
    store: Option<Arc<dyn TaskStore>>,
    transport: Option<Arc<dyn TransportAdapter>>,
    network: Arc<dyn NetworkMonitor>,
    notifier: Arc<dyn Notifier>,
}

impl SchedulerBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            store: None,
            transport: None,
            network: Arc::new(AlwaysOnline),
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn TransportAdapter>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn network(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = network;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// 启动工作线程，需要在 tokio 运行时中调用
    pub fn build(self) -> Result<SchedulerHandle> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(MultipartTransport::new(self.config.request_timeout)?),
        };
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryTaskStore::new()));

        let (command_tx, command_rx) = mpsc::channel(100);
        let (event_tx, _) = broadcast::channel(self.config.event_capacity);
        let ledger = TaskLedger::new(store, event_tx.clone(), self.notifier);

        let worker = SchedulerWorker::new(self.config, ledger, transport, self.network);
        let worker_handle = tokio::spawn(worker.run(command_rx));

        Ok(SchedulerHandle {
            scheduler: Scheduler { command_tx, event_tx },
            worker_handle,
        })
    }
}

fn check_id(task_id: &TaskId) -> Result<()> {
    if task_id.is_empty() {
        return Err(UploadError::invalid_config("task id must not be empty"));
    }
    Ok(())
}

impl Scheduler {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> SchedulerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| UploadError::SchedulerShutdown)?;

        // 等待响应
        reply_rx
            .await
            .map_err(|_| UploadError::SchedulerShutdown)?
    }

    /// 创建任务并开始上传，返回任务 ID
    pub async fn submit(&self, options: UploadOptions) -> Result<TaskId> {
        options.validate()?;
        self.request(|reply| SchedulerCommand::Submit { options, reply }).await
    }

    /// 用同一份配置上传多个文件
    pub async fn submit_batch(&self, files: Vec<PathBuf>, template: UploadOptions) -> Result<Vec<TaskId>> {
        self.request(|reply| SchedulerCommand::SubmitBatch { files, template, reply }).await
    }

    pub async fn pause(&self, task_id: &TaskId) -> Result<()> {
        check_id(task_id)?;
        let task_id = task_id.clone();
        self.request(|reply| SchedulerCommand::Pause { task_id, reply }).await
    }

    pub async fn resume(&self, task_id: &TaskId) -> Result<()> {
        check_id(task_id)?;
        let task_id = task_id.clone();
        self.request(|reply| SchedulerCommand::Resume { task_id, reply }).await
    }

    pub async fn cancel(&self, task_id: &TaskId) -> Result<()> {
        check_id(task_id)?;
        let task_id = task_id.clone();
        self.request(|reply| SchedulerCommand::Cancel { task_id, reply }).await
    }

    /// 删除任务记录，之后对该 ID 的操作返回 NotFound
    pub async fn remove(&self, task_id: &TaskId) -> Result<()> {
        check_id(task_id)?;
        let task_id = task_id.clone();
        self.request(|reply| SchedulerCommand::Remove { task_id, reply }).await
    }

    pub async fn get(&self, task_id: &TaskId) -> Result<TaskSnapshot> {
        check_id(task_id)?;
        let task_id = task_id.clone();
        self.request(|reply| SchedulerCommand::Get { task_id, reply }).await
    }

    pub async fn list(&self) -> Result<Vec<TaskSnapshot>> {
        self.request(|reply| SchedulerCommand::List { reply }).await
    }

    /// 宿主通知网络变化，可用时立即唤醒等待网络的任务
    pub async fn network_changed(&self, usable: bool) -> Result<()> {
        self.request(|reply| SchedulerCommand::NetworkChanged { usable, reply }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| SchedulerCommand::Shutdown { reply }).await
    }

    /// 订阅事件
    ///
    /// 注意：
    /// - 如果接收速度跟不上发送速度，可能会丢失事件（lagged error）
    /// - 每个订阅者都会收到完整的事件副本
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    /// 只接收 filter 返回 true 的事件
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F>
    where
        F: Fn(&UploadEvent) -> bool,
    {
        FilteredEventReceiver {
            receiver: self.event_tx.subscribe(),
            filter,
        }
    }
}

/// 过滤的事件接收器
pub struct FilteredEventReceiver<F> {
    receiver: broadcast::Receiver<UploadEvent>,
    filter: F,
}

impl<F> FilteredEventReceiver<F>
where
    F: Fn(&UploadEvent) -> bool,
{
    pub async fn recv(&mut self) -> Result<UploadEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if (self.filter)(&event) {
                return Ok(event);
            }
        }
    }
}
