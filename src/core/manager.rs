use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use super::errors::{QueueError, Result};
use super::traits::RemoteStore;
use super::types::{EnqueueReport, FileSource, QueueCommand, QueueEvent, TaskId, UploadTask};
use super::worker::QueueWorker;

/// 上传队列管理器。对外的唯一入口，内部把所有操作转发给
/// 独占存储的 worker 事件循环。
pub struct UploadQueueManager {
    command_tx: mpsc::Sender<QueueCommand>,
    event_tx: broadcast::Sender<QueueEvent>,
    worker_handle: JoinHandle<()>,
}

impl UploadQueueManager {
    pub fn new(config: QueueConfig, remote: Arc<dyn RemoteStore>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (event_tx, _) = broadcast::channel(256);

        let worker = QueueWorker::new(config, remote, event_tx.clone());
        let worker_handle = tokio::spawn(worker.run(command_rx));

        Self {
            command_tx,
            event_tx,
            worker_handle,
        }
    }

    /// 订阅队列事件与快照流
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    /// 校验并入队一批文件，返回接受/拒绝报告。
    /// 校验失败是报告里的数据，不是错误。
    pub async fn enqueue(&self, files: Vec<FileSource>) -> Result<EnqueueReport> {
        self.send(|reply| QueueCommand::Enqueue { files, reply })
            .await
    }

    /// 显式重试一个失败任务。次数耗尽时返回 RetriesExhausted。
    pub async fn retry(&self, id: TaskId) -> Result<()> {
        self.send(|reply| QueueCommand::Retry { id, reply })
            .await?
    }

    /// 从队列移除任务。上传中的任务返回 TaskInFlight。
    pub async fn remove(&self, id: TaskId) -> Result<()> {
        self.send(|reply| QueueCommand::Remove { id, reply })
            .await?
    }

    /// 清空所有非上传中的任务，返回移除数量
    pub async fn clear(&self) -> Result<usize> {
        self.send(|reply| QueueCommand::Clear { reply }).await
    }

    /// 获取单个任务快照
    pub async fn task(&self, id: TaskId) -> Result<Option<UploadTask>> {
        self.send(|reply| QueueCommand::GetTask { id, reply })
            .await
    }

    /// 获取所有任务快照，按提交顺序
    pub async fn tasks(&self) -> Result<Vec<UploadTask>> {
        self.send(|reply| QueueCommand::GetAllTasks { reply })
            .await
    }

    /// 关闭管理器。在途上传不被打断，但其结果不再反映到任何存储。
    pub async fn shutdown(self) -> Result<()> {
        self.command_tx
            .send(QueueCommand::Shutdown)
            .await
            .map_err(|_| QueueError::ManagerShutdown)?;
        self.worker_handle
            .await
            .map_err(|_| QueueError::ManagerShutdown)
    }

    async fn send<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> QueueCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| QueueError::ManagerShutdown)?;

        reply_rx.await.map_err(|_| QueueError::ManagerShutdown)
    }
}
