use async_trait::async_trait;

use super::errors::Result;
use super::progress::ProgressSink;
use super::types::{BulkResponse, FileSource, MediaRecord, RecordPatch};

/// 远端存储边界。队列和批量协调器唯一的悬挂点都在这里。
///
/// 实现方负责自己的超时，超时以失败的形式浮出。进度通过 sink 以真实的
/// 字节计数上报；做不到的实现可以不上报，调用方只会观察到 0 和 100。
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 上传单个文件，成功后返回持久化的媒体记录
    async fn upload(&self, file: &FileSource, progress: ProgressSink) -> Result<MediaRecord>;

    /// 一次调用批量更新多条记录，返回逐项成功/失败
    async fn bulk_update(&self, ids: &[String], patch: &RecordPatch) -> Result<BulkResponse>;

    /// 一次调用批量删除多条记录，返回逐项成功/失败
    async fn bulk_delete(&self, ids: &[String]) -> Result<BulkResponse>;
}
