use std::path::{Path, PathBuf};
use std::sync::Arc;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::errors::Result;
use super::validate::RejectedFile;

/// 上传任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 任务状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum TaskStatus {
    /// 等待中（在队列中）
    Pending,
    /// 上传中
    Uploading,
    /// 已完成
    Completed,
    /// 失败（可显式重试）
    Error,
}

/// 文件载荷的来源。队列只持有引用，从不复制字节。
#[derive(Debug, Clone)]
pub enum SourcePayload {
    /// 磁盘文件
    Path(PathBuf),
    /// 内存中的字节（引用计数，clone 不复制）
    Memory(Bytes),
}

impl Default for SourcePayload {
    fn default() -> Self {
        SourcePayload::Path(PathBuf::new())
    }
}

/// 待上传的文件描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSource {
    /// 文件名
    pub name: String,
    /// 文件大小（字节）
    pub size: u64,
    /// MIME 类型，例如 `image/png`
    pub mime: String,
    /// 原始载荷，不参与序列化
    #[serde(skip)]
    pub payload: SourcePayload,
}

impl FileSource {
    /// 从磁盘文件构建，大小取自文件元信息
    pub async fn from_path(path: impl Into<PathBuf>, mime: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            name,
            size: metadata.len(),
            mime: mime.into(),
            payload: SourcePayload::Path(path),
        })
    }

    /// 从内存字节构建
    pub fn from_bytes(name: impl Into<String>, mime: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            mime: mime.into(),
            payload: SourcePayload::Memory(bytes),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.payload {
            SourcePayload::Path(path) => Some(path),
            SourcePayload::Memory(_) => None,
        }
    }
}

/// 上传任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    /// 任务 ID
    pub id: TaskId,
    /// 文件描述
    pub source: FileSource,
    /// 当前状态
    pub status: TaskStatus,
    /// 进度百分比 [0, 100]，上传中单调不减
    pub progress: u8,
    /// 重试次数，只由显式 retry 递增
    pub retry_count: u32,
    /// 错误信息，仅在 Error 状态存在
    pub error: Option<String>,
    /// 上传成功后的远端记录
    pub record: Option<MediaRecord>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 开始时间
    pub started_at: Option<DateTime<Utc>>,
    /// 完成时间
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadTask {
    pub fn new(id: TaskId, source: FileSource) -> Self {
        Self {
            id,
            source,
            status: TaskStatus::Pending,
            progress: 0,
            retry_count: 0,
            error: None,
            record: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Error)
    }
}

/// 远端媒体记录。由远端存储拥有，本地持有最终一致的缓存副本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub id: String,
    pub name: String,
    pub url: String,
    pub size: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub favorite: bool,
}

/// 批量更新的补丁。未设置的字段保持原值，重复应用是幂等的。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorite: Option<bool>,
}

impl RecordPatch {
    pub fn apply(&self, record: &mut MediaRecord) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(tags) = &self.tags {
            record.tags = tags.clone();
        }
        if let Some(favorite) = self.favorite {
            record.favorite = favorite;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.tags.is_none() && self.favorite.is_none()
    }
}

/// 批量操作中单个成功项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItem {
    pub id: String,
}

/// 批量操作中单个失败项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemError {
    pub id: String,
    pub error: String,
}

/// 一次批量调用的逐项结果。
/// 远端保证每个请求 id 恰好出现在 results 或 errors 之一。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub results: Vec<BulkItem>,
    #[serde(default)]
    pub errors: Vec<BulkItemError>,
}

impl BulkResponse {
    pub fn ok(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            results: ids.into_iter().map(|id| BulkItem { id }).collect(),
            errors: Vec::new(),
        }
    }
}

/// 入队结果报告。被拒绝的文件不会产生任务。
#[derive(Debug, Clone)]
pub struct EnqueueReport {
    pub accepted: Vec<TaskId>,
    pub rejected: Vec<RejectedFile>,
}

/// 队列管理器命令
pub(crate) enum QueueCommand {
    /// 入队一批文件
    Enqueue {
        files: Vec<FileSource>,
        reply: oneshot::Sender<EnqueueReport>,
    },
    /// 显式重试失败任务
    Retry {
        id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },
    /// 从队列移除任务
    Remove {
        id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },
    /// 清空所有非上传中的任务
    Clear {
        reply: oneshot::Sender<usize>,
    },
    /// 获取任务信息
    GetTask {
        id: TaskId,
        reply: oneshot::Sender<Option<UploadTask>>,
    },
    /// 获取所有任务
    GetAllTasks {
        reply: oneshot::Sender<Vec<UploadTask>>,
    },
    /// 关闭管理器
    Shutdown,
}

/// 队列事件。通知层只订阅，核心从不渲染用户可见文案。
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// 任务已入队
    TaskAdded {
        id: TaskId,
    },
    /// 状态变更
    StateChanged {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    /// 进度更新
    Progress {
        id: TaskId,
        percent: u8,
    },
    /// 任务完成
    Completed {
        id: TaskId,
        record: MediaRecord,
    },
    /// 任务失败
    Failed {
        id: TaskId,
        error: String,
    },
    /// 入队时被拒绝的文件
    Rejected {
        rejected: Vec<RejectedFile>,
    },
    /// 队列完整快照，供进度 UI 订阅
    Snapshot(Arc<Vec<UploadTask>>),
}

// 静态断言确保类型是 Send 的
const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<UploadTask>();
        assert_send::<QueueEvent>();
        assert_send::<MediaRecord>();
    }
};
