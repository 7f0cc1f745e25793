use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;

use crate::core::ProgressSink;

pin_project! {
    /// 包装上传体字节流，把每个 chunk 的真实大小累加后喂给进度 sink。
    /// 进度来自实际传输的字节计数，不是定时器模拟。
    pub struct CountingStream<S> {
        #[pin]
        inner: S,
        sink: ProgressSink,
        bytes_sent: Arc<AtomicU64>,
    }
}

impl<S> CountingStream<S> {
    pub fn new(inner: S, sink: ProgressSink) -> Self {
        Self {
            inner,
            sink,
            bytes_sent: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<S> Stream for CountingStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let len = chunk.len() as u64;
                if len > 0 {
                    let total = this.bytes_sent.fetch_add(len, Ordering::Relaxed) + len;
                    this.sink.report_bytes(total);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                // 流结束时补一次最终进度
                let total = this.bytes_sent.load(Ordering::Relaxed);
                this.sink.report_bytes(total);
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskId;
    use futures::StreamExt;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_counts_chunks_into_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ProgressSink::new(TaskId::new(), 0, 10, tx);

        let chunks = vec![
            Ok(Bytes::from_static(b"hello")),
            Ok(Bytes::from_static(b"world")),
        ];
        let mut stream = CountingStream::new(futures::stream::iter(chunks), sink);

        while stream.next().await.is_some() {}
        drop(stream);

        let mut seen = Vec::new();
        while let Some(update) = rx.recv().await {
            seen.push(update.percent);
        }
        assert_eq!(seen, vec![50, 100]);
    }
}
