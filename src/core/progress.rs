use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;

use super::types::TaskId;

/// 单条进度更新，由上传流的真实字节计数产生。
/// attempt 标记产生它的那次尝试，旧尝试的残留更新据此丢弃。
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub id: TaskId,
    pub attempt: u32,
    pub percent: u8,
}

/// 把已传输字节数换算为整数百分比 [0, 100]
pub fn percent_of(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((transferred.saturating_mul(100)) / total).min(100) as u8
}

/// 进度上报端。远端边界在传输过程中调用，报告真实的已传输字节数。
///
/// 上报被钳制为单调不减：落后或重复的值直接丢弃，确保订阅方观察到的
/// 进度序列永不回退。无法提供字节计数的边界可以完全不调用——任务仍会
/// 经历派发时的 0 和完成时的 100 两端，中间值绝不凭空捏造。
#[derive(Debug, Clone)]
pub struct ProgressSink {
    id: TaskId,
    attempt: u32,
    total: u64,
    last: Arc<AtomicU8>,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressSink {
    pub(crate) fn new(
        id: TaskId,
        attempt: u32,
        total: u64,
        tx: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Self {
        Self {
            id,
            attempt,
            total,
            last: Arc::new(AtomicU8::new(0)),
            tx,
        }
    }

    /// 上报已传输字节数
    pub fn report_bytes(&self, transferred: u64) {
        self.report_percent(percent_of(transferred, self.total));
    }

    /// 上报百分比，钳制到 [last, 100]
    pub fn report_percent(&self, percent: u8) {
        let percent = percent.min(100);
        let prev = self.last.fetch_max(percent, Ordering::AcqRel);
        if percent > prev {
            let _ = self.tx.send(ProgressUpdate {
                id: self.id,
                attempt: self.attempt,
                percent,
            });
        }
    }

    /// 任务的总字节数
    pub fn total(&self) -> u64 {
        self.total
    }
}
