pub mod config;
pub mod core;
pub mod remote;
pub mod utils;

// 重新导出核心类型
pub use core::{
    BulkItem,
    BulkItemError,
    BulkMutationCoordinator,
    BulkOperation,
    BulkResponse,
    EnqueueReport,
    FileSource,
    LibraryEvent,
    MediaLibrary,
    MediaRecord,
    ProgressSink,
    QueueError,
    QueueEvent,
    RecordPatch,
    RejectReason,
    RejectedFile,
    RemoteStore,
    Result,
    SourcePayload,
    TaskId,
    TaskStatus,
    UploadQueueManager,
    UploadTask,
    ValidationReport,
    validate,
};
pub use config::{DispatchMode, QueueConfig};
pub use remote::HttpRemoteStore;
