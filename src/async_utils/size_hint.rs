//! Streams that know how many records remain.
//!
//! Batch inputs are counted up front, but line and CSV readers can't report
//! that count themselves. Wrapping them lets the progress bar show a real
//! total instead of a spinner.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;

/// The size hint after one more item has been yielded. Never underflows.
fn after_one_item(size_hint: (usize, Option<usize>)) -> (usize, Option<usize>) {
    let (lower, upper) = size_hint;
    (lower.saturating_sub(1), upper.map(|n| n.saturating_sub(1)))
}

/// A [`Stream`] reporting an externally supplied size hint, counted down as
/// items are consumed.
pub struct SizeHintStream<S> {
    inner: S,
    remaining: (usize, Option<usize>),
}

impl<S> Stream for SizeHintStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(Some(_)) = &polled {
            this.remaining = after_one_item(this.remaining);
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.remaining
    }
}

/// Adds [`WithSizeHintExt::with_size_hint`] to every [`Stream`].
pub trait WithSizeHintExt: Stream + Sized {
    /// Report `size_hint` for this stream, counting down as items arrive.
    fn with_size_hint(self, size_hint: (usize, Option<usize>)) -> SizeHintStream<Self> {
        SizeHintStream {
            inner: self,
            remaining: size_hint,
        }
    }
}

impl<S> WithSizeHintExt for S where S: Stream {}

#[cfg(test)]
mod tests {
    use futures::{StreamExt as _, stream};

    use super::*;

    #[tokio::test]
    async fn size_hint_counts_down() {
        let mut records = stream::iter(["a.pdf", "b.pdf"]).with_size_hint((2, Some(2)));
        assert_eq!(records.size_hint(), (2, Some(2)));
        assert_eq!(records.next().await, Some("a.pdf"));
        assert_eq!(records.size_hint(), (1, Some(1)));
        records.next().await;
        assert_eq!(records.next().await, None);
        assert_eq!(records.size_hint(), (0, Some(0)));
    }

    #[test]
    fn unknown_sizes_stay_unknown() {
        assert_eq!(after_one_item((0, None)), (0, None));
    }
}
