use crate::stream::variable::Variable;
use futures::{stream::Stream, task::Context, task::Poll};
use pin_project_lite::pin_project;
use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

/// Water marks of a [`Backpressure`] stage.
///
/// Invariants are enforced at construction: `low < high <= max`.
#[derive(Debug, Clone, Copy)]
pub struct BackpressureConfig {
    pub high_water_mark: usize,
    pub low_water_mark: usize,
    pub max_buffer_size: usize,
}

impl BackpressureConfig {
    pub fn new(high: usize, low: usize, max: usize) -> Self {
        let max = max.max(1);
        let high = high.clamp(1, max);
        let low = low.min(high.saturating_sub(1));
        Self {
            high_water_mark: high,
            low_water_mark: low,
            max_buffer_size: max,
        }
    }

    /// Marks derived from a single buffer size: pause at 80%, resume at 20%.
    pub fn for_buffer(size: usize) -> Self {
        let size = size.max(1);
        Self::new((size * 4 / 5).max(1), size / 5, size)
    }
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self::for_buffer(1000)
    }
}

/// Pause/resume/drop notifications, observable via [`BackpressureMetrics::signals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferSignal {
    #[default]
    Flowing,
    Paused,
    Dropping,
}

#[derive(Debug, Default)]
struct BackpressureShared {
    processed: AtomicU64,
    dropped: AtomicU64,
    pauses: AtomicU64,
    resumes: AtomicU64,
    buffered: AtomicUsize,
    signal: Variable<BufferSignal>,
}

/// Shared counters of a [`Backpressure`] stage.
#[derive(Debug, Clone, Default)]
pub struct BackpressureMetrics {
    inner: Arc<BackpressureShared>,
}

impl BackpressureMetrics {
    /// Items delivered downstream.
    pub fn processed(&self) -> u64 {
        self.inner.processed.load(Ordering::Relaxed)
    }

    /// Items dropped at capacity.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn pauses(&self) -> u64 {
        self.inner.pauses.load(Ordering::Relaxed)
    }

    pub fn resumes(&self) -> u64 {
        self.inner.resumes.load(Ordering::Relaxed)
    }

    /// Current buffer fill.
    pub fn buffered(&self) -> usize {
        self.inner.buffered.load(Ordering::Relaxed)
    }

    /// Observer stream of pause/resume/drop transitions.
    pub fn signals(&self) -> crate::stream::variable::Observer<BufferSignal> {
        self.inner.signal.observer()
    }
}

pin_project! {
    /// Stream for the [`backpressure`](super::WeftStreamExt::backpressure) method.
    ///
    /// Each consumer poll fills the internal buffer from upstream until the
    /// high water mark, then stops polling upstream (pausing it) until the
    /// buffer has drained to the low water mark. Items arriving while the
    /// buffer sits at `max_buffer_size` are dropped and counted; this is the
    /// declared drop policy, not an error.
    #[must_use = "streams do nothing unless polled"]
    pub struct Backpressure<St: Stream> {
        #[pin]
        stream: St,
        config: BackpressureConfig,
        buf: VecDeque<St::Item>,
        paused: bool,
        upstream_done: bool,
        metrics: BackpressureMetrics,
    }
}

impl<St: Stream> Backpressure<St> {
    pub(crate) fn new(stream: St, config: BackpressureConfig) -> Self {
        Self {
            stream,
            config,
            buf: VecDeque::new(),
            paused: false,
            upstream_done: false,
            metrics: BackpressureMetrics::default(),
        }
    }

    /// Handle for reading the stage counters, also after the stream moved on.
    pub fn metrics(&self) -> BackpressureMetrics {
        self.metrics.clone()
    }
}

impl<St: Stream> Stream for Backpressure<St> {
    type Item = St::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<St::Item>> {
        let mut this = self.project();
        let shared = &this.metrics.inner;

        // fill from upstream unless paused
        while !*this.upstream_done && !*this.paused {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    if this.buf.len() >= this.config.max_buffer_size {
                        shared.dropped.fetch_add(1, Ordering::Relaxed);
                        shared.signal.set(BufferSignal::Dropping);
                        continue;
                    }
                    this.buf.push_back(item);
                    if this.buf.len() >= this.config.high_water_mark && this.buf.len() < this.config.max_buffer_size {
                        *this.paused = true;
                        shared.pauses.fetch_add(1, Ordering::Relaxed);
                        shared.signal.set(BufferSignal::Paused);
                        tracing::debug!(buffered = this.buf.len(), "backpressure pause");
                    }
                }
                Poll::Ready(None) => *this.upstream_done = true,
                Poll::Pending => break,
            }
        }

        let next = this.buf.pop_front();
        shared.buffered.store(this.buf.len(), Ordering::Relaxed);
        if *this.paused && this.buf.len() <= this.config.low_water_mark {
            *this.paused = false;
            shared.resumes.fetch_add(1, Ordering::Relaxed);
            shared.signal.set(BufferSignal::Flowing);
            tracing::debug!(buffered = this.buf.len(), "backpressure resume");
        }
        match next {
            Some(item) => {
                shared.processed.fetch_add(1, Ordering::Relaxed);
                Poll::Ready(Some(item))
            }
            None if *this.upstream_done => Poll::Ready(None),
            None => Poll::Pending,
        }
    }
}
