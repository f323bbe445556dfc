//! Fixed-size rechunking of sample streams

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Extension trait to regroup a stream of sample buffers into fixed-size chunks
pub trait RechunkExt<T>: Stream<Item = Vec<T>> {
    /// Emit buffers of exactly `size` samples, in arrival order.
    ///
    /// Input buffers may have any length. Nothing is dropped: a trailing
    /// partial chunk is emitted when the inner stream ends.
    fn rechunk(self, size: usize) -> Rechunk<Self, T>
    where
        Self: Sized,
    {
        Rechunk::new(self, size)
    }
}

impl<S, T> RechunkExt<T> for S where S: Stream<Item = Vec<T>> {}

pin_project! {
    /// A stream combinator that regroups sample buffers into fixed-size chunks
    pub struct Rechunk<S, T> {
        #[pin]
        stream: S,
        size: usize,
        pending: Vec<T>,
        done: bool,
    }
}

impl<S, T> Rechunk<S, T> {
    /// Create a new rechunking stream. A zero size is treated as one.
    pub fn new(stream: S, size: usize) -> Self {
        let size = size.max(1);
        Self { stream, size, pending: Vec::with_capacity(size), done: false }
    }

    /// Number of samples buffered but not yet emitted
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

impl<S, T> Stream for Rechunk<S, T>
where
    S: Stream<Item = Vec<T>>,
{
    type Item = Vec<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if this.pending.len() >= *this.size {
                let rest = this.pending.split_off(*this.size);
                let chunk = std::mem::replace(this.pending, rest);
                return Poll::Ready(Some(chunk));
            }

            if *this.done {
                if this.pending.is_empty() {
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(std::mem::take(this.pending)));
            }

            match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(buffer) => this.pending.extend(buffer),
                None => *this.done = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::stream;

    #[tokio::test]
    async fn regroups_uneven_buffers() {
        let input = stream::iter(vec![vec![1, 2, 3], vec![4], vec![5, 6, 7, 8, 9]]);
        let chunks: Vec<Vec<i32>> = input.rechunk(4).collect().await;
        assert_eq!(chunks, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8], vec![9]]);
    }

    #[tokio::test]
    async fn large_buffer_splits_into_many_chunks() {
        let input = stream::iter(vec![(0..10).collect::<Vec<u8>>()]);
        let chunks: Vec<Vec<u8>> = input.rechunk(3).collect().await;
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), (0..10).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let input = stream::iter(Vec::<Vec<f32>>::new());
        let chunks: Vec<Vec<f32>> = input.rechunk(4096).collect().await;
        assert!(chunks.is_empty());
    }
}
