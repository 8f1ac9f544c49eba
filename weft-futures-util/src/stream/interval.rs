use futures::Stream;
use std::task::Poll;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Tick stream used for window retirement sweeps and the memory sampler.
pub struct Interval(time::Interval);

impl Interval {
    pub(crate) fn new(period: time::Duration) -> Self {
        let mut inner = time::interval(period);
        inner.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self(inner)
    }
}

impl Stream for Interval {
    type Item = Instant;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        match self.get_mut().0.poll_tick(cx) {
            Poll::Ready(x) => Poll::Ready(Some(x)),
            Poll::Pending => Poll::Pending,
        }
    }
}
