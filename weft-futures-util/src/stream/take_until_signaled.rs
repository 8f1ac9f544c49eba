use futures::{
    future::Future,
    stream::{FusedStream, Stream},
    task::{Context, Poll},
};
use pin_project_lite::pin_project;
use std::pin::Pin;

pin_project! {
    /// Stream for the [`take_until_signaled`](super::WeftStreamExt::take_until_signaled) method.
    ///
    /// Ends the stream as soon as `signal` completes, checking the signal
    /// before the inner stream so cancellation wins a race against a ready
    /// item.
    #[must_use = "streams do nothing unless polled"]
    pub struct TakeUntilSignaled<St, F> {
        #[pin]
        stream: St,
        #[pin]
        signal: F,
        done: bool,
    }
}

impl<St: Stream, F: Future> TakeUntilSignaled<St, F> {
    pub(crate) fn new(stream: St, signal: F) -> Self {
        Self {
            stream,
            signal,
            done: false,
        }
    }
}

impl<St: Stream, F: Future> Stream for TakeUntilSignaled<St, F> {
    type Item = St::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<St::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        if this.signal.poll(cx).is_ready() {
            *this.done = true;
            return Poll::Ready(None);
        }
        match this.stream.poll_next(cx) {
            Poll::Ready(None) => {
                *this.done = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<St: Stream, F: Future> FusedStream for TakeUntilSignaled<St, F> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}
