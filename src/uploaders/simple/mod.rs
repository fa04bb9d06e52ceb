use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;
use crate::core::{
    AttemptOutcome,
    ProgressCallback,
    Result,
    UploadSession,
    UploadTask,
    Uploader,
    WholeFileRequest,
};
use crate::utils::ProgressThrottle;

/// 整文件上传器，重试时从头发送
pub struct SimpleUploader;

/// 整文件请求：额外字段在前，file 在后
pub fn whole_file_request(task: &UploadTask) -> WholeFileRequest {
    let mut fields: Vec<_> = task.options.extra_fields
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    fields.sort();

    WholeFileRequest {
        endpoint: task.options.endpoint.clone(),
        headers: task.options.headers.clone(),
        fields,
        file_path: task.options.file_path.clone(),
        file_name: task.options.file_name(),
    }
}

#[async_trait]
impl Uploader for SimpleUploader {
    async fn run(&self, session: &UploadSession, task: &UploadTask, file_size: u64) -> Result<AttemptOutcome> {
        if session.token.is_cancelled() {
            return session.stopped().await;
        }

        if task.options.adaptive_network && !session.network.is_usable().await {
            debug!(task = %task.id, "network unavailable, deferring");
            return Ok(AttemptOutcome::WaitForNetwork);
        }

        let request = whole_file_request(task);
        let (progress_tx, mut progress_rx) = watch::channel(0u64);
        let on_progress: ProgressCallback = Arc::new(move |sent, _total| {
            progress_tx.send_replace(sent);
        });

        let send = session.transport.send_whole(&request, on_progress);
        tokio::pin!(send);

        let mut throttle = ProgressThrottle::new(session.progress_interval);
        let mut watching = true;
        let response = loop {
            tokio::select! {
                _ = session.token.cancelled() => return session.stopped().await,
                response = &mut send => break response,
                changed = progress_rx.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }

                    let sent = *progress_rx.borrow_and_update();
                    if throttle.ready() {
                        session.ledger.record_bytes(&task.id, sent, file_size).await?;
                    }
                }
            }
        };

        match session.classify(response).await? {
            Some(outcome) => Ok(outcome),
            None => session.complete().await,
        }
    }
}
