use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::utils::RetryPolicy;
use super::errors::{QueueError, Result};
use super::progress::{ProgressSink, ProgressUpdate};
use super::store::QueueStore;
use super::traits::RemoteStore;
use super::types::{
    EnqueueReport, FileSource, MediaRecord, QueueCommand, QueueEvent, TaskId, TaskStatus,
    UploadTask,
};
use super::validate::validate;

/// 一次上传尝试的最终结果，由派发出去的 tokio 任务送回事件循环
struct TaskCompletion {
    id: TaskId,
    outcome: Result<MediaRecord>,
}

/// 队列的执行者。独占持有 QueueStore 和文件载荷引用，
/// 在单个事件循环里顺序地处理命令、进度和完成事件。
pub(crate) struct QueueWorker {
    remote: Arc<dyn RemoteStore>,
    config: QueueConfig,
    retry_policy: RetryPolicy,
    store: QueueStore,
    /// 原始载荷引用，任务移除时一并丢弃。队列从不复制文件字节。
    sources: HashMap<TaskId, FileSource>,
    in_flight: usize,
    event_tx: broadcast::Sender<QueueEvent>,
    progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
    progress_rx: mpsc::UnboundedReceiver<ProgressUpdate>,
    completion_tx: mpsc::UnboundedSender<TaskCompletion>,
    completion_rx: mpsc::UnboundedReceiver<TaskCompletion>,
}

impl QueueWorker {
    pub(crate) fn new(
        config: QueueConfig,
        remote: Arc<dyn RemoteStore>,
        event_tx: broadcast::Sender<QueueEvent>,
    ) -> Self {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let retry_policy = RetryPolicy::new(config.max_retries);

        Self {
            remote,
            config,
            retry_policy,
            store: QueueStore::new(),
            sources: HashMap::new(),
            in_flight: 0,
            event_tx,
            progress_tx,
            progress_rx,
            completion_tx,
            completion_rx,
        }
    }

    /// 主事件循环。命令、完成、进度都在这里串行处理，
    /// 保证每次状态变更都作用在最新的存储快照上。
    pub(crate) async fn run(mut self, mut command_rx: mpsc::Receiver<QueueCommand>) {
        loop {
            tokio::select! {
                maybe_command = command_rx.recv() => {
                    match maybe_command {
                        Some(QueueCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                Some(done) = self.completion_rx.recv() => {
                    self.handle_completion(done);
                }
                Some(update) = self.progress_rx.recv() => {
                    self.handle_progress(update);
                }
            }

            self.pump();
        }

        debug!("queue worker stopped");
    }

    /// 按调度模式派发等待中的任务
    fn pump(&mut self) {
        let limit = self.config.dispatch.limit();

        while self.in_flight < limit {
            let Some(id) = self.store.next_pending() else {
                break;
            };
            self.dispatch(id);
        }
    }

    fn dispatch(&mut self, id: TaskId) {
        let Some(source) = self.sources.get(&id).cloned() else {
            self.store
                .mark_error(&id, "source payload missing".to_string());
            self.emit_snapshot();
            return;
        };
        let retry_count = self.store.get(&id).map(|t| t.retry_count).unwrap_or(0);

        self.store.mark_uploading(&id);
        self.in_flight += 1;
        self.emit(QueueEvent::StateChanged {
            id,
            from: TaskStatus::Pending,
            to: TaskStatus::Uploading,
        });
        self.emit(QueueEvent::Progress { id, percent: 0 });
        self.emit_snapshot();

        debug!(task = %id, retry = retry_count, "dispatching upload");

        let remote = self.remote.clone();
        let sink = ProgressSink::new(id, retry_count, source.size, self.progress_tx.clone());
        let completion_tx = self.completion_tx.clone();
        // 重试派发前按策略退避
        let delay = retry_count
            .checked_sub(1)
            .map(|attempt| self.retry_policy.delay_for(attempt));

        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let outcome = remote.upload(&source, sink).await;
            let _ = completion_tx.send(TaskCompletion { id, outcome });
        });
    }

    fn handle_completion(&mut self, done: TaskCompletion) {
        self.in_flight = self.in_flight.saturating_sub(1);

        match done.outcome {
            Ok(record) => {
                info!(task = %done.id, url = %record.url, "upload completed");
                self.store.mark_completed(&done.id, record.clone());
                self.emit(QueueEvent::StateChanged {
                    id: done.id,
                    from: TaskStatus::Uploading,
                    to: TaskStatus::Completed,
                });
                self.emit(QueueEvent::Progress {
                    id: done.id,
                    percent: 100,
                });
                self.emit(QueueEvent::Completed {
                    id: done.id,
                    record,
                });
            }
            Err(err) => {
                let error = err.to_string();
                warn!(task = %done.id, %error, "upload failed");
                self.store.mark_error(&done.id, error.clone());
                self.emit(QueueEvent::StateChanged {
                    id: done.id,
                    from: TaskStatus::Uploading,
                    to: TaskStatus::Error,
                });
                self.emit(QueueEvent::Failed { id: done.id, error });
            }
        }

        self.emit_snapshot();
    }

    fn handle_progress(&mut self, update: ProgressUpdate) {
        // 旧尝试的 sink 可能还有排队中的更新，按尝试序号丢弃
        let attempt = self.store.get(&update.id).map(|t| t.retry_count);
        if attempt != Some(update.attempt) {
            return;
        }
        if self.store.set_progress(&update.id, update.percent) {
            self.emit(QueueEvent::Progress {
                id: update.id,
                percent: update.percent,
            });
            self.emit_snapshot();
        }
    }

    fn handle_command(&mut self, command: QueueCommand) {
        match command {
            QueueCommand::Enqueue { files, reply } => {
                let report = self.enqueue(files);
                let _ = reply.send(report);
            }
            QueueCommand::Retry { id, reply } => {
                let _ = reply.send(self.retry(id));
            }
            QueueCommand::Remove { id, reply } => {
                let _ = reply.send(self.remove(id));
            }
            QueueCommand::Clear { reply } => {
                let removed = self.store.clear_settled();
                for id in &removed {
                    self.sources.remove(id);
                }
                if !removed.is_empty() {
                    self.emit_snapshot();
                }
                let _ = reply.send(removed.len());
            }
            QueueCommand::GetTask { id, reply } => {
                let _ = reply.send(self.store.get(&id).cloned());
            }
            QueueCommand::GetAllTasks { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
            QueueCommand::Shutdown => unreachable!("handled in run loop"),
        }
    }

    /// 校验并入队。被拒绝的文件只产生报告和事件，不产生任务。
    fn enqueue(&mut self, files: Vec<FileSource>) -> EnqueueReport {
        let report = validate(files, &self.config);

        if !report.rejected.is_empty() {
            debug!(count = report.rejected.len(), "files rejected by validation");
            self.emit(QueueEvent::Rejected {
                rejected: report.rejected.clone(),
            });
        }

        let mut accepted = Vec::with_capacity(report.accepted.len());
        for source in report.accepted {
            let id = TaskId::new();
            let task = UploadTask::new(id, source.clone());
            self.sources.insert(id, source);
            self.store.push(task);
            self.emit(QueueEvent::TaskAdded { id });
            accepted.push(id);
        }

        if !accepted.is_empty() {
            self.emit_snapshot();
        }

        EnqueueReport {
            accepted,
            rejected: report.rejected,
        }
    }

    /// 显式重试。次数耗尽时快速失败，从不越过上限。
    fn retry(&mut self, id: TaskId) -> Result<()> {
        let task = self.store.get(&id).ok_or(QueueError::TaskNotFound(id))?;

        if task.status == TaskStatus::Error && !self.retry_policy.allows(task.retry_count) {
            return Err(QueueError::RetriesExhausted(id));
        }

        let retry_count = self.store.mark_retrying(&id)?;
        info!(task = %id, retry = retry_count, "task queued for retry");
        self.emit(QueueEvent::StateChanged {
            id,
            from: TaskStatus::Error,
            to: TaskStatus::Pending,
        });
        self.emit_snapshot();
        Ok(())
    }

    fn remove(&mut self, id: TaskId) -> Result<()> {
        self.store.remove(&id)?;
        self.sources.remove(&id);
        self.emit_snapshot();
        Ok(())
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_snapshot(&self) {
        let _ = self
            .event_tx
            .send(QueueEvent::Snapshot(Arc::new(self.store.snapshot())));
    }
}
