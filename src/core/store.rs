use std::collections::HashMap;
use chrono::Utc;

use super::errors::{QueueError, Result};
use super::types::{MediaRecord, TaskId, TaskStatus, UploadTask};

/// 队列的权威存储：按提交顺序维护的任务集合。
///
/// 由 QueueWorker 独占持有（单一写者）。所有变更在 worker 的事件循环里
/// 顺序地作用在当前状态上，两个"同时"完成的任务不可能互相覆盖——这里
/// 不存在 last-writer-wins 的窗口。外部只能通过广播快照读取。
#[derive(Debug, Default)]
pub struct QueueStore {
    order: Vec<TaskId>,
    tasks: HashMap<TaskId, UploadTask>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 追加到队尾，保持提交顺序
    pub fn push(&mut self, task: UploadTask) {
        let id = task.id;
        self.tasks.insert(id, task);
        self.order.push(id);
    }

    pub fn get(&self, id: &TaskId) -> Option<&UploadTask> {
        self.tasks.get(id)
    }

    /// 按提交顺序找第一个等待中的任务
    pub fn next_pending(&self) -> Option<TaskId> {
        self.order
            .iter()
            .find(|id| {
                self.tasks
                    .get(*id)
                    .is_some_and(|t| t.status == TaskStatus::Pending)
            })
            .copied()
    }

    pub fn in_flight(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Uploading)
            .count()
    }

    /// Pending -> Uploading，进度归零
    pub fn mark_uploading(&mut self, id: &TaskId) {
        if let Some(task) = self.tasks.get_mut(id) {
            if task.status == TaskStatus::Pending {
                task.status = TaskStatus::Uploading;
                task.progress = 0;
                task.started_at = Some(Utc::now());
            }
        }
    }

    /// 上传中任务的进度更新。只接受单调增长的值，返回是否实际变更。
    pub fn set_progress(&mut self, id: &TaskId, percent: u8) -> bool {
        let Some(task) = self.tasks.get_mut(id) else {
            return false;
        };
        if task.status != TaskStatus::Uploading {
            return false;
        }
        let percent = percent.min(100);
        if percent <= task.progress {
            return false;
        }
        task.progress = percent;
        true
    }

    /// Uploading -> Completed。完成态不可再离开。
    pub fn mark_completed(&mut self, id: &TaskId, record: MediaRecord) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.status = TaskStatus::Completed;
            task.progress = 100;
            task.error = None;
            task.record = Some(record);
            task.completed_at = Some(Utc::now());
        }
    }

    /// Uploading -> Error。retry_count 保持不变，重试是独立的显式动作。
    pub fn mark_error(&mut self, id: &TaskId, error: String) {
        if let Some(task) = self.tasks.get_mut(id) {
            if task.status == TaskStatus::Completed {
                return;
            }
            task.status = TaskStatus::Error;
            task.error = Some(error);
            task.completed_at = Some(Utc::now());
        }
    }

    /// Error -> Pending，递增 retry_count 并清除错误。次数上限由调用方把关。
    pub fn mark_retrying(&mut self, id: &TaskId) -> Result<u32> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or(QueueError::TaskNotFound(*id))?;

        if task.status != TaskStatus::Error {
            return Err(QueueError::NotRetryable {
                id: *id,
                status: task.status,
            });
        }

        task.retry_count += 1;
        task.status = TaskStatus::Pending;
        task.progress = 0;
        task.error = None;
        task.started_at = None;
        task.completed_at = None;
        Ok(task.retry_count)
    }

    /// 移除任务。上传中的任务不可移除（基线设计不支持在途取消）。
    pub fn remove(&mut self, id: &TaskId) -> Result<UploadTask> {
        let task = self.tasks.get(id).ok_or(QueueError::TaskNotFound(*id))?;
        if task.status == TaskStatus::Uploading {
            return Err(QueueError::TaskInFlight(*id));
        }

        self.order.retain(|x| x != id);
        self.tasks
            .remove(id)
            .ok_or(QueueError::TaskNotFound(*id))
    }

    /// 清空所有非上传中的任务，返回被移除的 id
    pub fn clear_settled(&mut self) -> Vec<TaskId> {
        let removed: Vec<TaskId> = self
            .order
            .iter()
            .filter(|id| {
                self.tasks
                    .get(*id)
                    .is_some_and(|t| t.status != TaskStatus::Uploading)
            })
            .copied()
            .collect();

        for id in &removed {
            self.tasks.remove(id);
        }
        self.order.retain(|id| self.tasks.contains_key(id));
        removed
    }

    /// 按提交顺序的完整快照
    pub fn snapshot(&self) -> Vec<UploadTask> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FileSource;
    use chrono::Utc;

    fn task(name: &str) -> UploadTask {
        UploadTask::new(
            TaskId::new(),
            FileSource {
                name: name.into(),
                size: 10,
                mime: "image/png".into(),
                payload: Default::default(),
            },
        )
    }

    fn record(id: &str) -> MediaRecord {
        MediaRecord {
            id: id.into(),
            name: "a.png".into(),
            url: format!("https://cdn.example.com/{id}"),
            size: 10,
            mime_type: "image/png".into(),
            uploaded_at: Utc::now(),
            tags: Vec::new(),
            favorite: false,
        }
    }

    #[test]
    fn test_submission_order_preserved() {
        let mut store = QueueStore::new();
        let a = task("a");
        let b = task("b");
        let (a_id, b_id) = (a.id, b.id);
        store.push(a);
        store.push(b);

        assert_eq!(store.next_pending(), Some(a_id));
        store.mark_uploading(&a_id);
        assert_eq!(store.next_pending(), Some(b_id));

        let names: Vec<String> = store.snapshot().into_iter().map(|t| t.source.name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_progress_never_regresses() {
        let mut store = QueueStore::new();
        let t = task("a");
        let id = t.id;
        store.push(t);
        store.mark_uploading(&id);

        assert!(store.set_progress(&id, 40));
        assert!(!store.set_progress(&id, 20));
        assert!(!store.set_progress(&id, 40));
        assert!(store.set_progress(&id, 90));
        assert_eq!(store.get(&id).unwrap().progress, 90);
    }

    #[test]
    fn test_completed_implies_full_progress() {
        let mut store = QueueStore::new();
        let t = task("a");
        let id = t.id;
        store.push(t);
        store.mark_uploading(&id);
        store.set_progress(&id, 30);
        store.mark_completed(&id, record("m1"));

        let task = store.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert!(task.record.is_some());

        // 完成态不可回退
        store.mark_error(&id, "late failure".into());
        assert_eq!(store.get(&id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_retry_transition() {
        let mut store = QueueStore::new();
        let t = task("a");
        let id = t.id;
        store.push(t);

        // 只有 Error 态可重试
        assert!(matches!(
            store.mark_retrying(&id),
            Err(QueueError::NotRetryable { .. })
        ));

        store.mark_uploading(&id);
        store.mark_error(&id, "network".into());
        assert_eq!(store.mark_retrying(&id).unwrap(), 1);

        let task = store.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert!(task.error.is_none());
    }

    #[test]
    fn test_remove_in_flight_rejected() {
        let mut store = QueueStore::new();
        let t = task("a");
        let id = t.id;
        store.push(t);
        store.mark_uploading(&id);

        assert!(matches!(
            store.remove(&id),
            Err(QueueError::TaskInFlight(_))
        ));

        store.mark_completed(&id, record("m1"));
        assert!(store.remove(&id).is_ok());
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear_keeps_uploading() {
        let mut store = QueueStore::new();
        let a = task("a");
        let b = task("b");
        let c = task("c");
        let (a_id, b_id) = (a.id, b.id);
        store.push(a);
        store.push(b);
        store.push(c);

        store.mark_uploading(&a_id);
        store.mark_uploading(&b_id);
        store.mark_error(&b_id, "boom".into());

        let removed = store.clear_settled();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&a_id).unwrap().status, TaskStatus::Uploading);
    }
}
