use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{info, warn};

use super::errors::{QueueError, Result};
use super::traits::RemoteStore;
use super::types::{BulkItemError, MediaRecord, RecordPatch};

/// 批量操作类型，用于事件上报
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOperation {
    Update,
    Delete,
}

impl std::fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BulkOperation::Update => write!(f, "update"),
            BulkOperation::Delete => write!(f, "delete"),
        }
    }
}

/// 记录库事件。部分失败是警告级别的数据，不是异常。
#[derive(Debug, Clone)]
pub enum LibraryEvent {
    /// 记录被更新（含新插入）
    Updated { ids: Vec<String> },
    /// 记录被删除
    Removed { ids: Vec<String> },
    /// 整库刷新
    Refreshed { count: usize },
    /// 批量操作部分失败，操作整体视为"带例外地成功"
    PartialFailure {
        operation: BulkOperation,
        failed: Vec<BulkItemError>,
    },
}

/// 媒体记录的本地缓存，最终一致。由 BulkMutationCoordinator 独占写入。
#[derive(Debug, Default)]
pub struct MediaLibrary {
    records: HashMap<String, MediaRecord>,
}

impl MediaLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&MediaRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn insert(&mut self, record: MediaRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn remove(&mut self, id: &str) -> Option<MediaRecord> {
        self.records.remove(id)
    }

    /// 对单条记录应用补丁，返回记录是否存在
    pub fn apply_patch(&mut self, id: &str, patch: &RecordPatch) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                patch.apply(record);
                true
            }
            None => false,
        }
    }

    /// 用快照恢复单条记录
    pub fn restore(&mut self, record: MediaRecord) {
        self.records.insert(record.id.clone(), record);
    }

    /// 整库替换
    pub fn replace_all(&mut self, records: Vec<MediaRecord>) {
        self.records = records
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
    }

    /// 按上传时间倒序的快照
    pub fn snapshot(&self) -> Vec<MediaRecord> {
        let mut records: Vec<MediaRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }
}

/// 批量变更协调器。
///
/// 对远端发起整批一次的 update/delete，本地乐观应用并按逐项结果对账：
/// 失败项回滚到操作前快照，部分失败以事件上报，全部失败才作为错误抛出。
/// 删除不做乐观移除——没有响应前移除无法干净回滚。
pub struct BulkMutationCoordinator {
    remote: Arc<dyn RemoteStore>,
    library: RwLock<MediaLibrary>,
    /// 串行化批量操作：快照、乐观写、对账必须针对同一个前置状态
    op_lock: Mutex<()>,
    event_tx: broadcast::Sender<LibraryEvent>,
}

impl BulkMutationCoordinator {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            remote,
            library: RwLock::new(MediaLibrary::new()),
            op_lock: Mutex::new(()),
            event_tx,
        }
    }

    /// 订阅记录库事件
    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.event_tx.subscribe()
    }

    /// 当前记录快照，按上传时间倒序
    pub async fn records(&self) -> Vec<MediaRecord> {
        self.library.read().await.snapshot()
    }

    pub async fn record(&self, id: &str) -> Option<MediaRecord> {
        self.library.read().await.get(id).cloned()
    }

    /// 插入单条记录（通常来自完成的上传）
    pub async fn insert(&self, record: MediaRecord) {
        let id = record.id.clone();
        self.library.write().await.insert(record);
        self.emit(LibraryEvent::Updated { ids: vec![id] });
    }

    /// 用远端拉取的结果刷新整库
    pub async fn refresh(&self, records: Vec<MediaRecord>) {
        let count = records.len();
        self.library.write().await.replace_all(records);
        self.emit(LibraryEvent::Refreshed { count });
    }

    /// 批量更新。乐观应用补丁，失败项回滚到操作前快照。
    ///
    /// 部分失败返回 Ok 并广播 PartialFailure；全部失败回滚一切并返回
    /// FatalBatch。对已带有该补丁的记录重复调用是无操作。
    pub async fn bulk_update(&self, ids: &[String], patch: &RecordPatch) -> Result<()> {
        if ids.is_empty() || patch.is_empty() {
            return Ok(());
        }

        let _guard = self.op_lock.lock().await;

        // 先拍快照再乐观写，回滚依赖操作前的精确状态
        let snapshots: HashMap<String, MediaRecord> = {
            let mut library = self.library.write().await;
            let snapshots = ids
                .iter()
                .filter_map(|id| library.get(id).map(|r| (id.clone(), r.clone())))
                .collect();
            for id in ids {
                library.apply_patch(id, patch);
            }
            snapshots
        };

        let response = match self.remote.bulk_update(ids, patch).await {
            Ok(response) => response,
            Err(err) => {
                // 传输层失败：整批回滚，视为致命
                warn!(count = ids.len(), error = %err, "bulk update transport failure");
                let mut library = self.library.write().await;
                for record in snapshots.into_values() {
                    library.restore(record);
                }
                return Err(err);
            }
        };

        let failed = response.errors;
        if !failed.is_empty() {
            let mut library = self.library.write().await;
            for item in &failed {
                if let Some(original) = snapshots.get(&item.id) {
                    library.restore(original.clone());
                }
            }
        }

        self.settle(BulkOperation::Update, ids, failed, |ok_ids| {
            LibraryEvent::Updated { ids: ok_ids }
        })
    }

    /// 批量删除。本地移除推迟到远端响应之后，失败项原样保留。
    pub async fn bulk_delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let _guard = self.op_lock.lock().await;

        // 删除不乐观应用：此刻本地尚未改动，传输失败无需回滚
        let response = match self.remote.bulk_delete(ids).await {
            Ok(response) => response,
            Err(err) => {
                warn!(count = ids.len(), error = %err, "bulk delete transport failure");
                return Err(err);
            }
        };

        {
            let mut library = self.library.write().await;
            for item in &response.results {
                library.remove(&item.id);
            }
        }

        self.settle(BulkOperation::Delete, ids, response.errors, |ok_ids| {
            LibraryEvent::Removed { ids: ok_ids }
        })
    }

    /// 对账收尾：区分全部失败（致命）与部分失败（警告）
    fn settle(
        &self,
        operation: BulkOperation,
        ids: &[String],
        failed: Vec<BulkItemError>,
        make_event: impl FnOnce(Vec<String>) -> LibraryEvent,
    ) -> Result<()> {
        if !failed.is_empty() && failed.len() >= ids.len() {
            warn!(%operation, count = ids.len(), "bulk operation failed for every item");
            return Err(QueueError::FatalBatch { failed });
        }

        let ok_ids: Vec<String> = ids
            .iter()
            .filter(|id| !failed.iter().any(|f| &f.id == *id))
            .cloned()
            .collect();

        if !ok_ids.is_empty() {
            self.emit(make_event(ok_ids));
        }

        if failed.is_empty() {
            info!(%operation, count = ids.len(), "bulk operation completed");
            Ok(())
        } else {
            warn!(
                %operation,
                failed = failed.len(),
                total = ids.len(),
                "bulk operation completed with exceptions"
            );
            self.emit(LibraryEvent::PartialFailure { operation, failed });
            Ok(())
        }
    }

    fn emit(&self, event: LibraryEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, favorite: bool) -> MediaRecord {
        MediaRecord {
            id: id.into(),
            name: format!("{id}.png"),
            url: format!("https://cdn.example.com/{id}"),
            size: 1024,
            mime_type: "image/png".into(),
            uploaded_at: Utc::now(),
            tags: Vec::new(),
            favorite,
        }
    }

    #[test]
    fn test_patch_is_idempotent() {
        let mut library = MediaLibrary::new();
        library.insert(record("a", false));

        let patch = RecordPatch {
            favorite: Some(true),
            tags: Some(vec!["hero".into()]),
            ..Default::default()
        };

        assert!(library.apply_patch("a", &patch));
        let once = library.get("a").unwrap().clone();
        assert!(library.apply_patch("a", &patch));
        assert_eq!(library.get("a").unwrap(), &once);
    }

    #[test]
    fn test_patch_missing_record() {
        let mut library = MediaLibrary::new();
        assert!(!library.apply_patch("ghost", &RecordPatch::default()));
    }

    #[test]
    fn test_restore_brings_back_snapshot() {
        let mut library = MediaLibrary::new();
        let original = record("a", false);
        library.insert(original.clone());

        let patch = RecordPatch {
            name: Some("renamed.png".into()),
            ..Default::default()
        };
        library.apply_patch("a", &patch);
        assert_eq!(library.get("a").unwrap().name, "renamed.png");

        library.restore(original.clone());
        assert_eq!(library.get("a").unwrap(), &original);
    }

    #[test]
    fn test_snapshot_sorted_by_upload_time() {
        let mut library = MediaLibrary::new();
        let mut older = record("old", false);
        older.uploaded_at = Utc::now() - chrono::Duration::hours(1);
        library.insert(older);
        library.insert(record("new", false));

        let snapshot = library.snapshot();
        assert_eq!(snapshot[0].id, "new");
        assert_eq!(snapshot[1].id, "old");
    }
}
