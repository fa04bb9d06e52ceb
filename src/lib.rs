pub mod core;
pub mod uploaders;
pub mod utils;
pub mod config;

// 重新导出核心类型
pub use crate::core::{
    Scheduler,
    SchedulerBuilder,
    SchedulerHandle,
    TaskId,
    TaskSnapshot,
    UploadEvent,
    UploadMode,
    UploadOptions,
    UploadStatus,
    UploadTask,
    UploadError,
    Result,
};
pub use config::{Config, SchedulerConfig};

// 重新导出传输层
pub use uploaders::MultipartTransport;
