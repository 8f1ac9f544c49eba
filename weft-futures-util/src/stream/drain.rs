use futures::{ready, stream::Stream, task::Context, task::Poll, Future};
use pin_project_lite::pin_project;
use std::pin::Pin;

pin_project! {
    /// Future for the [`drain`](super::WeftStreamExt::drain) method: polls the
    /// stream to completion, discarding all items.
    #[must_use = "futures do nothing unless polled"]
    pub struct Drain<St> {
        #[pin]
        stream: St,
    }
}

impl<St: Stream> Drain<St> {
    pub(crate) fn new(stream: St) -> Self {
        Self { stream }
    }
}

impl<St: Stream> Future for Drain<St> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut this = self.project();
        loop {
            if ready!(this.stream.as_mut().poll_next(cx)).is_none() {
                return Poll::Ready(());
            }
        }
    }
}
