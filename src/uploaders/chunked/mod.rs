use std::io::{ErrorKind, SeekFrom};
use std::ops::Range;
use std::path::Path;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, trace};
use crate::core::planner;
use crate::core::{
    AttemptOutcome,
    ChunkRecord,
    ChunkRequest,
    Result,
    UploadError,
    UploadSession,
    UploadStatus,
    UploadTask,
    Uploader,
};

/// 分片上传器
///
/// 每一轮取最小的若干个未上传分片并发发送，按索引顺序处理响应。
pub struct ChunkedUploader;

/// 构造一个分片请求，字段顺序：chunkIndex, totalChunks, uploadId, fileName, 额外字段
pub fn chunk_request(task: &UploadTask, index: u64, total_chunks: u64, bytes: Bytes) -> ChunkRequest {
    let file_name = task.options.file_name();
    let mut fields = vec![
        ("chunkIndex".to_string(), index.to_string()),
        ("totalChunks".to_string(), total_chunks.to_string()),
        ("uploadId".to_string(), task.id.to_string()),
        ("fileName".to_string(), file_name.clone()),
    ];

    let mut extra: Vec<_> = task.options.extra_fields.iter().collect();
    extra.sort();
    fields.extend(extra.into_iter().map(|(key, value)| (key.clone(), value.clone())));

    ChunkRequest {
        endpoint: task.options.endpoint.clone(),
        headers: task.options.headers.clone(),
        fields,
        file_name,
        bytes,
    }
}

async fn read_range(file: &mut File, range: Range<u64>) -> std::io::Result<Bytes> {
    let mut buffer = vec![0u8; (range.end - range.start) as usize];
    file.seek(SeekFrom::Start(range.start)).await?;
    file.read_exact(&mut buffer).await?;
    Ok(Bytes::from(buffer))
}

fn is_missing(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::UnexpectedEof)
}

async fn open(session: &UploadSession, path: &Path) -> Result<std::result::Result<File, AttemptOutcome>> {
    match File::open(path).await {
        Ok(file) => Ok(Ok(file)),
        Err(err) if is_missing(&err) => session
            .fail(&UploadError::FileMissing(path.to_path_buf()))
            .await
            .map(Err),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl Uploader for ChunkedUploader {
    async fn run(&self, session: &UploadSession, task: &UploadTask, file_size: u64) -> Result<AttemptOutcome> {
        let options = &task.options;
        let total_chunks = planner::total_chunks(file_size, options.chunk_size)?;
        session.ledger.prune_chunks(&task.id, total_chunks).await?;

        let mut file = match open(session, &options.file_path).await? {
            Ok(file) => file,
            Err(outcome) => return Ok(outcome),
        };

        loop {
            if session.token.is_cancelled() {
                return session.stopped().await;
            }

            // 每一轮都重新读取记录
            let Some(current) = session.ledger.find(&task.id).await? else {
                return Ok(AttemptOutcome::Removed);
            };
            if current.status != UploadStatus::Running {
                return Ok(UploadSession::outcome_for(&current));
            }

            if options.adaptive_network && !session.network.is_usable().await {
                debug!(task = %task.id, "network unavailable, deferring");
                return Ok(AttemptOutcome::WaitForNetwork);
            }

            let window = planner::pending_window(&current.uploaded_chunks, total_chunks, options.max_parallel_uploads);
            if window.is_empty() {
                return session.complete().await;
            }

            let mut requests = Vec::with_capacity(window.len());
            for index in window {
                let range = planner::chunk_range(index, file_size, options.chunk_size)
                    .ok_or_else(|| UploadError::internal(format!("chunk {} has no bytes", index)))?;

                match read_range(&mut file, range).await {
                    Ok(bytes) => requests.push((index, chunk_request(&current, index, total_chunks, bytes))),
                    Err(err) if is_missing(&err) => {
                        return session.fail(&UploadError::FileMissing(options.file_path.clone())).await;
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            trace!(task = %task.id, chunks = ?requests.iter().map(|(index, _)| *index).collect::<Vec<_>>(), "sending chunks");
            let sends = join_all(requests.iter().map(|(_, request)| session.transport.send_chunk(request)));

            // 取消时丢弃正在进行的请求
            let responses = tokio::select! {
                _ = session.token.cancelled() => return session.stopped().await,
                responses = sends => responses,
            };

            for ((index, _), response) in requests.iter().zip(responses) {
                if let Some(outcome) = session.classify(response).await? {
                    return Ok(outcome);
                }

                match session.ledger.record_chunk(&task.id, *index, total_chunks, file_size).await? {
                    ChunkRecord::Recorded(_) => {}
                    ChunkRecord::Ignored(current) => return Ok(UploadSession::outcome_for(&current)),
                    ChunkRecord::Missing => return Ok(AttemptOutcome::Removed),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TaskId, UploadOptions};

    #[test]
    fn test_chunk_request_field_order() {
        let options = UploadOptions::new("/data/clip.mov", "https://example.com/upload")
            .chunked(4)
            .field("userId", "42")
            .field("album", "trip");
        let task = UploadTask::new(TaskId::from("task-1"), options);

        let request = chunk_request(&task, 2, 5, Bytes::from_static(b"abcd"));
        let names: Vec<_> = request.fields.iter().map(|(name, _)| name.as_str()).collect();

        assert_eq!(names, vec!["chunkIndex", "totalChunks", "uploadId", "fileName", "album", "userId"]);
        assert_eq!(request.field("chunkIndex"), Some("2"));
        assert_eq!(request.field("totalChunks"), Some("5"));
        assert_eq!(request.field("uploadId"), Some("task-1"));
        assert_eq!(request.field("fileName"), Some("clip.mov"));
        assert_eq!(request.file_name, "clip.mov");
        assert_eq!(request.bytes.as_ref(), b"abcd");
    }

    #[tokio::test]
    async fn test_read_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let mut file = File::open(&path).await.unwrap();
        assert_eq!(read_range(&mut file, 4..8).await.unwrap().as_ref(), b"4567");
        assert_eq!(read_range(&mut file, 8..10).await.unwrap().as_ref(), b"89");

        let err = read_range(&mut file, 8..12).await.unwrap_err();
        assert!(is_missing(&err));
    }
}
