use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use crate::core::ProgressCallback;

pin_project! {
    /// 统计已经交给 HTTP body 的字节数
    pub struct CountingStream<S> {
        #[pin]
        inner: S,
        sent: u64,
        total: u64,
        on_progress: ProgressCallback,
    }
}

impl<S> CountingStream<S> {
    pub fn new(inner: S, total: u64, on_progress: ProgressCallback) -> Self {
        Self {
            inner,
            sent: 0,
            total,
            on_progress,
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
                if !chunk.is_empty() {
                    *this.sent += chunk.len() as u64;
                    (this.on_progress)(*this.sent, *this.total);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use futures::StreamExt;
    use super::*;

    #[tokio::test]
    async fn test_counts_cumulative_bytes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let callback: ProgressCallback = {
            let seen = seen.clone();
            Arc::new(move |sent, total| seen.lock().unwrap().push((sent, total)))
        };

        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"defg")),
        ];
        let stream = CountingStream::new(futures::stream::iter(chunks), 7, callback);
        let collected: Vec<_> = stream.collect().await;

        assert_eq!(collected.len(), 3);
        assert_eq!(seen.lock().unwrap().as_slice(), &[(3, 7), (7, 7)]);
    }
}
