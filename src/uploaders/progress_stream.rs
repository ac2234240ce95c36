use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use crate::core::ProgressFn;

pin_project! {
    /// Counts bytes as the HTTP body is pulled and reports the running
    /// fraction of `total`. Several streams may share one counter.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        sent: Arc<AtomicU64>,
        total: u64,
        on_progress: ProgressFn,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, sent: Arc<AtomicU64>, total: u64, on_progress: ProgressFn) -> Self {
        Self {
            inner,
            sent,
            total,
            on_progress,
        }
    }
}

impl<S> Stream for ProgressStream<S>
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
                    let sent = this.sent.fetch_add(len, Ordering::Relaxed) + len;
                    (this.on_progress)(fraction(sent, *this.total));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

fn fraction(sent: u64, total: u64) -> f64 {
    if total == 0 {
        return 1.0;
    }

    (sent as f64 / total as f64).min(1.0)
}

/// Split an in-memory blob into a stream of `chunk_size` slices without copying.
pub fn chunked(data: Bytes, chunk_size: usize) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect();

    futures::stream::iter(chunks.into_iter().map(Ok))
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use parking_lot::Mutex;
    use super::*;

    #[tokio::test]
    async fn test_chunked_slices_cover_blob() {
        let data = Bytes::from_static(b"abcdefghij");
        let chunks: Vec<Bytes> = chunked(data, 4)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks, vec![
            Bytes::from_static(b"abcd"),
            Bytes::from_static(b"efgh"),
            Bytes::from_static(b"ij"),
        ]);
    }

    #[tokio::test]
    async fn test_progress_is_reported_across_shared_counter() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let on_progress: ProgressFn = {
            let reports = reports.clone();
            Arc::new(move |fraction: f64| reports.lock().push(fraction))
        };
        let sent = Arc::new(AtomicU64::new(0));

        let first = ProgressStream::new(chunked(Bytes::from(vec![0u8; 6]), 3), sent.clone(), 8, on_progress.clone());
        let second = ProgressStream::new(chunked(Bytes::from(vec![0u8; 2]), 3), sent.clone(), 8, on_progress);

        let _: Vec<_> = first.collect().await;
        let _: Vec<_> = second.collect().await;

        assert_eq!(*reports.lock(), vec![0.375, 0.75, 1.0]);
        assert_eq!(sent.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn test_empty_total_counts_as_done() {
        assert_eq!(fraction(0, 0), 1.0);
        assert_eq!(fraction(10, 4), 1.0);
    }
}
