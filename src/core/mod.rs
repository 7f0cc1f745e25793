mod bulk;
mod errors;
mod manager;
mod progress;
mod store;
mod traits;
mod types;
mod validate;
mod worker;

pub use bulk::{BulkMutationCoordinator, BulkOperation, LibraryEvent, MediaLibrary};
pub use errors::{QueueError, Result};
pub use manager::UploadQueueManager;
pub use progress::{ProgressSink, ProgressUpdate, percent_of};
pub use store::QueueStore;
pub use traits::RemoteStore;
pub use types::{
    BulkItem, BulkItemError, BulkResponse, EnqueueReport, FileSource, MediaRecord, QueueEvent,
    RecordPatch, SourcePayload, TaskId, TaskStatus, UploadTask,
};
pub use validate::{RejectReason, RejectedFile, ValidationReport, validate};
