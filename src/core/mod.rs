mod errors;
mod types;
mod traits;
mod ledger;
mod session;
mod scheduler;
mod scheduler_worker;

pub mod planner;
pub mod store;
pub mod network;
pub mod notify;

#[cfg(test)]
mod tests;

pub use errors::{Result, UploadError};
pub use types::{
    TaskId,
    TaskSnapshot,
    UploadEvent,
    UploadMode,
    UploadOptions,
    UploadStatus,
    UploadTask,
};
pub use traits::{
    ChunkRequest,
    Mutation,
    NetworkMonitor,
    Notifier,
    ProgressCallback,
    TaskStore,
    TransportAdapter,
    UpdateOutcome,
    Uploader,
    WholeFileRequest,
};
pub use ledger::{ChunkRecord, TaskLedger, Transition};
pub use session::{AttemptOutcome, UploadSession};
pub use scheduler::{FilteredEventReceiver, Scheduler, SchedulerBuilder, SchedulerHandle};
pub use store::{JsonFileTaskStore, MemoryTaskStore};
pub use network::{AlwaysOnline, NetworkTransport, SwitchableNetwork};
pub use notify::{LogNotifier, NoopNotifier};
