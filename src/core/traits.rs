use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use super::errors::Result;
use super::session::{AttemptOutcome, UploadSession};
use super::types::{TaskId, UploadStatus, UploadTask};

/// 整文件上传的进度回调 (已发送字节, 总字节)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// 单个分片请求
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub endpoint: String,
    pub headers: HashMap<String, String>,
    /// 表单字段，按顺序写在 file 之后
    pub fields: Vec<(String, String)>,
    pub file_name: String,
    pub bytes: Bytes,
}

impl ChunkRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// 整文件请求
#[derive(Debug, Clone)]
pub struct WholeFileRequest {
    pub endpoint: String,
    pub headers: HashMap<String, String>,
    /// 表单字段，写在 file 之前
    pub fields: Vec<(String, String)>,
    pub file_path: PathBuf,
    pub file_name: String,
}

/// HTTP 传输层，只负责发送并返回状态码
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// 发送一个分片
    async fn send_chunk(&self, request: &ChunkRequest) -> Result<u16>;

    /// 发送整个文件，边写边回调已发送字节数
    async fn send_whole(&self, request: &WholeFileRequest, on_progress: ProgressCallback) -> Result<u16>;
}

/// 在存储锁内执行的修改，返回 false 表示不写入
pub type Mutation = Box<dyn FnOnce(&mut UploadTask) -> bool + Send>;

#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// 记录不存在
    Missing,
    /// 修改被拒绝，返回当前记录
    Unchanged(UploadTask),
    /// 已写入，previous 为写入前的状态
    Applied {
        previous: UploadStatus,
        task: UploadTask,
    },
}

/// 存储适配器 trait - 任务记录的唯一数据源
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 加载任务
    async fn get(&self, id: &TaskId) -> Result<Option<UploadTask>>;

    /// 保存任务（存在则覆盖）
    async fn put(&self, task: &UploadTask) -> Result<()>;

    /// 删除任务，返回记录是否存在
    async fn delete(&self, id: &TaskId) -> Result<bool>;

    /// 列出所有任务
    async fn list_all(&self) -> Result<Vec<UploadTask>>;

    /// 单条记录的原子读改写
    async fn update(&self, id: &TaskId, mutation: Mutation) -> Result<UpdateOutcome>;
}

/// 网络是否可用
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    async fn is_usable(&self) -> bool;
}

/// 面向用户的通知
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 进度更新回调
    async fn on_progress(&self, task_id: &TaskId, progress: u8, speed: f64, eta: Option<u64>);

    /// 进入终态回调，每个任务只调用一次
    async fn on_terminal(&self, task_id: &TaskId, status: UploadStatus, error: Option<&str>);
}

/// 某种上传模式的单次尝试
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn run(&self, session: &UploadSession, task: &UploadTask, file_size: u64) -> Result<AttemptOutcome>;
}
