use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::config::SchedulerConfig;
use crate::utils::{RetryDecision, RetryPolicy, RetryStrategy};
use super::errors::{Result, UploadError};
use super::ledger::{TaskLedger, Transition};
use super::scheduler::SchedulerCommand;
use super::session::{AttemptOutcome, UploadSession};
use super::traits::{NetworkMonitor, TransportAdapter};
use super::types::{TaskId, TaskSnapshot, UploadOptions, UploadStatus, UploadTask};

struct ActiveAttempt {
    generation: u64,
    token: CancellationToken,
    join_handle: JoinHandle<()>,
}

struct PendingTimer {
    ticket: u64,
    handle: JoinHandle<()>,
}

enum WorkerMessage {
    Finished {
        task_id: TaskId,
        generation: u64,
        outcome: AttemptOutcome,
    },
    TimerDue {
        task_id: TaskId,
        ticket: u64,
    },
}

pub(crate) struct SchedulerWorker {
    config: SchedulerConfig,
    ledger: TaskLedger,
    transport: Arc<dyn TransportAdapter>,
    network: Arc<dyn NetworkMonitor>,
    permits: Arc<Semaphore>,
    retry_policy: RetryPolicy,

    /// 每个任务最多一个活动尝试
    active: HashMap<TaskId, ActiveAttempt>,
    /// 等待重试或等待网络的定时器
    timers: HashMap<TaskId, PendingTimer>,
    waiting_network: HashSet<TaskId>,
    next_generation: u64,
    next_ticket: u64,
    shutting_down: bool,

    message_tx: mpsc::UnboundedSender<WorkerMessage>,
    message_rx: mpsc::UnboundedReceiver<WorkerMessage>,
}

impl SchedulerWorker {
    pub(crate) fn new(
        config: SchedulerConfig,
        ledger: TaskLedger,
        transport: Arc<dyn TransportAdapter>,
        network: Arc<dyn NetworkMonitor>,
    ) -> Self {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        let retry_policy = RetryPolicy::new(RetryStrategy::linear(config.retry_base_delay, config.retry_max_delay));

        Self {
            config,
            ledger,
            transport,
            network,
            permits,
            retry_policy,
            active: HashMap::new(),
            timers: HashMap::new(),
            waiting_network: HashSet::new(),
            next_generation: 0,
            next_ticket: 0,
            shutting_down: false,
            message_tx,
            message_rx,
        }
    }

    pub(crate) async fn run(mut self, mut command_rx: mpsc::Receiver<SchedulerCommand>) {
        // 恢复之前的任务
        if let Err(err) = self.restore().await {
            error!(error = %err, "failed to restore tasks");
        }

        // 主事件循环
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(SchedulerCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    // 所有句柄都已释放
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(message) = self.message_rx.recv() => {
                    self.handle_message(message).await;
                }
            }
        }

        info!("scheduler stopped");
    }

    async fn restore(&mut self) -> Result<()> {
        let tasks = self.ledger.list().await?;
        let mut restored = 0;

        for task in tasks {
            // Paused 的任务等待 resume
            if matches!(task.status, UploadStatus::Enqueued | UploadStatus::Running) {
                self.start(task.id);
                restored += 1;
            }
        }

        if restored > 0 {
            info!(count = restored, "restored unfinished tasks");
        }
        Ok(())
    }

    async fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Submit { options, reply } => {
                let result = self.submit(options).await;
                let _ = reply.send(result);
            }
            SchedulerCommand::SubmitBatch { files, template, reply } => {
                let result = self.submit_batch(files, template).await;
                let _ = reply.send(result);
            }
            SchedulerCommand::Pause { task_id, reply } => {
                let result = self.pause(task_id).await;
                let _ = reply.send(result);
            }
            SchedulerCommand::Resume { task_id, reply } => {
                let result = self.resume(task_id).await;
                let _ = reply.send(result);
            }
            SchedulerCommand::Cancel { task_id, reply } => {
                let result = self.cancel(task_id).await;
                let _ = reply.send(result);
            }
            SchedulerCommand::Remove { task_id, reply } => {
                let result = self.remove(task_id).await;
                let _ = reply.send(result);
            }
            SchedulerCommand::Get { task_id, reply } => {
                let result = self.ledger.load(&task_id).await.map(|task| task.snapshot());
                let _ = reply.send(result);
            }
            SchedulerCommand::List { reply } => {
                let result = self.ledger
                    .list()
                    .await
                    .map(|tasks| tasks.iter().map(UploadTask::snapshot).collect::<Vec<TaskSnapshot>>());
                let _ = reply.send(result);
            }
            SchedulerCommand::NetworkChanged { usable, reply } => {
                self.network_changed(usable);
                let _ = reply.send(Ok(()));
            }
            SchedulerCommand::Shutdown { reply } => {
                // 在 run 中处理
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn submit(&mut self, options: UploadOptions) -> Result<TaskId> {
        options.validate()?;

        let task = UploadTask::new(TaskId::new(), options);
        let task_id = task.id.clone();
        self.ledger.create(task).await?;
        self.start(task_id.clone());

        Ok(task_id)
    }

    async fn submit_batch(&mut self, files: Vec<PathBuf>, template: UploadOptions) -> Result<Vec<TaskId>> {
        // 先全部校验，避免只创建一部分
        let batch: Vec<UploadOptions> = files.iter().map(|file| template.for_file(file)).collect();
        for options in &batch {
            options.validate()?;
        }

        let mut ids = Vec::with_capacity(batch.len());
        for options in batch {
            ids.push(self.submit(options).await?);
        }
        Ok(ids)
    }

    async fn pause(&mut self, task_id: TaskId) -> Result<()> {
        match self.ledger.transition(&task_id, UploadStatus::Paused, None).await? {
            Transition::Applied(_) | Transition::Unchanged(_) => {}
            Transition::Rejected(task) => {
                return Err(UploadError::InvalidTransition { from: task.status, to: UploadStatus::Paused });
            }
        }

        // 先写状态再触发 token，尝试停止时读到的是 Paused
        self.clear_pending(&task_id);
        if let Some(active) = self.active.get(&task_id) {
            active.token.cancel();
        }
        Ok(())
    }

    async fn resume(&mut self, task_id: TaskId) -> Result<()> {
        let task = self.ledger.load(&task_id).await?;
        match task.status {
            UploadStatus::Paused | UploadStatus::Failed => {}
            UploadStatus::Enqueued | UploadStatus::Running => {
                // 已在排队或运行，只唤醒等待中的任务
                if !self.active.contains_key(&task_id) {
                    self.start(task_id);
                }
                return Ok(());
            }
            status => {
                return Err(UploadError::InvalidTransition { from: status, to: UploadStatus::Enqueued });
            }
        }

        // 等旧的尝试完全停止
        if let Some(active) = self.active.remove(&task_id) {
            active.token.cancel();
            let _ = active.join_handle.await;
        }

        match self.ledger.transition(&task_id, UploadStatus::Enqueued, None).await? {
            Transition::Applied(_) | Transition::Unchanged(_) => {
                self.start(task_id);
                Ok(())
            }
            Transition::Rejected(task) => {
                Err(UploadError::InvalidTransition { from: task.status, to: UploadStatus::Enqueued })
            }
        }
    }

    async fn cancel(&mut self, task_id: TaskId) -> Result<()> {
        match self.ledger.transition(&task_id, UploadStatus::Canceled, None).await? {
            Transition::Applied(_) | Transition::Unchanged(_) => {}
            // 已完成或已失败的任务没有可取消的上传
            Transition::Rejected(task) if task.status.is_terminal() => {
                debug!(task = %task_id, status = ?task.status, "cancel on finished task ignored");
                self.clear_pending(&task_id);
                return Ok(());
            }
            Transition::Rejected(task) => {
                return Err(UploadError::InvalidTransition { from: task.status, to: UploadStatus::Canceled });
            }
        }

        self.clear_pending(&task_id);
        if let Some(active) = self.active.get(&task_id) {
            active.token.cancel();
        }
        Ok(())
    }

    async fn remove(&mut self, task_id: TaskId) -> Result<()> {
        self.ledger.load(&task_id).await?;
        self.clear_pending(&task_id);

        if let Some(active) = self.active.remove(&task_id) {
            match self.ledger.transition(&task_id, UploadStatus::Canceled, None).await {
                Ok(_) => {}
                Err(err) => warn!(task = %task_id, error = %err, "failed to cancel before remove"),
            }
            active.token.cancel();
            let _ = active.join_handle.await;
        }

        if !self.ledger.remove(&task_id).await? {
            return Err(UploadError::NotFound(task_id));
        }
        Ok(())
    }

    fn network_changed(&mut self, usable: bool) {
        info!(usable, waiting = self.waiting_network.len(), "network changed");
        if !usable {
            return;
        }

        let waiting: Vec<_> = self.waiting_network.drain().collect();
        for task_id in waiting {
            self.start(task_id);
        }
    }

    /// 启动一次尝试，已有活动尝试时不做任何事
    fn start(&mut self, task_id: TaskId) {
        if self.shutting_down {
            return;
        }

        self.clear_pending(&task_id);
        if self.active.contains_key(&task_id) {
            debug!(task = %task_id, "attempt already active");
            return;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let token = CancellationToken::new();

        let session = UploadSession {
            id: task_id.clone(),
            ledger: self.ledger.clone(),
            transport: self.transport.clone(),
            network: self.network.clone(),
            token: token.clone(),
            progress_interval: self.config.progress_interval,
        };
        let permits = self.permits.clone();
        let message_tx = self.message_tx.clone();
        let id = task_id.clone();

        let join_handle = tokio::spawn(async move {
            // 只有等待名额的阶段需要和 token 竞争，运行中的取消由 session 自己处理
            let outcome = tokio::select! {
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => {
                        let outcome = session.run().await;
                        drop(permit);
                        outcome
                    }
                    Err(_) => AttemptOutcome::Retry(UploadError::SchedulerShutdown),
                },
                _ = session.token.cancelled() => match session.stopped().await {
                    Ok(outcome) => outcome,
                    Err(err) => AttemptOutcome::Retry(err),
                },
            };

            let _ = message_tx.send(WorkerMessage::Finished {
                task_id: id,
                generation,
                outcome,
            });
        });

        debug!(task = %task_id, generation, "attempt spawned");
        self.active.insert(task_id, ActiveAttempt {
            generation,
            token,
            join_handle,
        });
    }

    async fn handle_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Finished { task_id, generation, outcome } => {
                let current = self.active.get(&task_id).map(|active| active.generation);
                if current != Some(generation) {
                    debug!(task = %task_id, generation, "stale attempt finished");
                    return;
                }
                self.active.remove(&task_id);
                self.handle_outcome(task_id, outcome).await;
            }
            WorkerMessage::TimerDue { task_id, ticket } => {
                let due = self.timers.get(&task_id).is_some_and(|timer| timer.ticket == ticket);
                if due {
                    self.timers.remove(&task_id);
                    self.waiting_network.remove(&task_id);
                    self.start(task_id);
                }
            }
        }
    }

    async fn handle_outcome(&mut self, task_id: TaskId, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Completed => info!(task = %task_id, "attempt completed"),
            AttemptOutcome::Failed(message) => warn!(task = %task_id, error = %message, "attempt failed"),
            AttemptOutcome::Paused => debug!(task = %task_id, "attempt paused"),
            AttemptOutcome::Canceled => debug!(task = %task_id, "attempt canceled"),
            AttemptOutcome::Removed => debug!(task = %task_id, "task removed during attempt"),
            AttemptOutcome::Preempted => {
                self.requeue(&task_id).await;
                self.start(task_id);
            }
            AttemptOutcome::Retry(err) => self.schedule_retry(task_id, err).await,
            AttemptOutcome::WaitForNetwork => {
                debug!(task = %task_id, delay = ?self.config.network_retry_delay, "waiting for network");
                self.waiting_network.insert(task_id.clone());
                self.arm_timer(task_id, self.config.network_retry_delay);
            }
        }
    }

    async fn schedule_retry(&mut self, task_id: TaskId, err: UploadError) {
        let task = match self.ledger.bump_retry(&task_id).await {
            Ok(Some(task)) => task,
            // 已被暂停、取消或删除
            Ok(None) => return,
            Err(store_err) => {
                error!(task = %task_id, error = %store_err, "failed to count retry");
                return;
            }
        };

        match self.retry_policy.decide(task.retry_count, task.options.max_retries) {
            RetryDecision::RetryAfter(delay) => {
                info!(task = %task_id, retry = task.retry_count, delay = ?delay, error = %err, "retry scheduled");
                self.arm_timer(task_id, delay);
            }
            RetryDecision::GiveUp => {
                let message = format!("{} (gave up after {} retries)", err, task.options.max_retries);
                warn!(task = %task_id, error = %message, "retries exhausted");
                if let Err(store_err) = self.ledger.transition(&task_id, UploadStatus::Failed, Some(message)).await {
                    error!(task = %task_id, error = %store_err, "failed to mark task failed");
                }
            }
        }
    }

    fn arm_timer(&mut self, task_id: TaskId, delay: Duration) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let message_tx = self.message_tx.clone();
        let id = task_id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = message_tx.send(WorkerMessage::TimerDue { task_id: id, ticket });
        });

        if let Some(previous) = self.timers.insert(task_id, PendingTimer { ticket, handle }) {
            previous.handle.abort();
        }
    }

    /// 取消等待中的重试和网络等待
    fn clear_pending(&mut self, task_id: &TaskId) {
        if let Some(timer) = self.timers.remove(task_id) {
            timer.handle.abort();
        }
        self.waiting_network.remove(task_id);
    }

    /// 被抢占的任务重新排队
    async fn requeue(&self, task_id: &TaskId) {
        if let Err(err) = self.ledger.transition(task_id, UploadStatus::Enqueued, None).await {
            warn!(task = %task_id, error = %err, "failed to requeue preempted task");
        }
    }

    async fn shutdown(&mut self) {
        self.shutting_down = true;
        info!(active = self.active.len(), pending = self.timers.len(), "shutting down scheduler");

        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        self.waiting_network.clear();

        let active: Vec<_> = self.active.drain().collect();
        for (_, attempt) in &active {
            attempt.token.cancel();
        }
        for (task_id, attempt) in active {
            if let Err(err) = attempt.join_handle.await {
                error!(task = %task_id, error = %err, "attempt panicked");
            }
        }

        // 被抢占的任务保持 Enqueued，下次启动时恢复
        while let Ok(message) = self.message_rx.try_recv() {
            if let WorkerMessage::Finished { task_id, outcome: AttemptOutcome::Preempted, .. } = message {
                self.requeue(&task_id).await;
            }
        }
    }
}
