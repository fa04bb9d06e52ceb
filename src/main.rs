use std::collections::HashSet;
use std::sync::Arc;
use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ferry::core::{AlwaysOnline, JsonFileTaskStore, LogNotifier, MemoryTaskStore, TaskStore};
use ferry::{Config, MultipartTransport, SchedulerBuilder, TaskId, UploadEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&path).with_context(|| format!("failed to load {}", path))?;
    info!(path = %path, uploads = config.uploads.len(), "configuration loaded");

    let store: Arc<dyn TaskStore> = match &config.scheduler.state_file {
        Some(state_file) => {
            let store = JsonFileTaskStore::open(state_file)
                .await
                .with_context(|| format!("failed to open state file {}", state_file.display()))?;
            info!(path = %store.path().display(), "using state file");
            Arc::new(store)
        }
        None => Arc::new(MemoryTaskStore::new()),
    };
    let transport = MultipartTransport::new(config.scheduler.request_timeout)
        .context("failed to build HTTP client")?;

    let handle = SchedulerBuilder::new(config.scheduler.clone())
        .store(store)
        .transport(Arc::new(transport))
        .network(Arc::new(AlwaysOnline))
        .notifier(Arc::new(LogNotifier))
        .build()?;
    let scheduler = handle.scheduler.clone();

    // 先订阅，避免错过很快结束的任务
    let mut events = scheduler.subscribe_filtered(|event: &UploadEvent| match event {
        UploadEvent::StateChanged { snapshot, .. } => snapshot.status.is_terminal(),
        UploadEvent::Removed { .. } => true,
        UploadEvent::Progress(_) => false,
    });
    let mut finished: HashSet<TaskId> = HashSet::new();
    let mut submitted = Vec::new();

    for options in config.uploads {
        let file = options.file_path.display().to_string();
        match scheduler.submit(options).await {
            Ok(task_id) => {
                info!(task = %task_id, file = %file, "upload submitted");
                submitted.push(task_id);
            }
            Err(err) => warn!(file = %file, error = %err, "upload rejected"),
        }
    }

    while submitted.iter().any(|id| !finished.contains(id)) {
        match events.recv().await {
            Ok(event) => {
                finished.insert(event.task_id().clone());
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event receiver lagged, reloading task list");
                for snapshot in scheduler.list().await? {
                    if snapshot.status.is_terminal() {
                        finished.insert(snapshot.task_id);
                    }
                }
            }
            Err(RecvError::Closed) => break,
        }
    }

    for snapshot in scheduler.list().await? {
        info!(
            task = %snapshot.task_id,
            status = ?snapshot.status,
            progress = snapshot.progress,
            error = snapshot.error_message.as_deref().unwrap_or(""),
            "final state"
        );
    }

    drop(scheduler);
    handle.shutdown().await?;
    Ok(())
}
