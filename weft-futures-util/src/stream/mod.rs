mod backpressure;
mod dedup_window;
mod drain;
mod drainer;
#[cfg(feature = "with_tokio")]
mod interval;
mod take_until_signaled;

pub mod variable;

pub use backpressure::{Backpressure, BackpressureConfig, BackpressureMetrics, BufferSignal};
pub use dedup_window::{DedupMetrics, DedupWindow};
pub use drain::Drain;
pub use drainer::Drainer;
#[cfg(feature = "with_tokio")]
pub use interval::Interval;
pub use take_until_signaled::TakeUntilSignaled;

use futures::prelude::*;
use std::{hash::Hash, time::Duration};

/// Create a stream of ticks starting immediately and with the given cadence.
#[cfg(feature = "with_tokio")]
pub fn interval(period: Duration) -> Interval {
    Interval::new(period)
}

pub trait WeftStreamExt: Stream + Sized {
    /// Drop items whose key was already seen within a sliding time window.
    ///
    /// `key_of` produces the identity of an item (typically a content hash),
    /// `time_of` its position on the time axis in milliseconds. The cache
    /// keeps at most `max_entries` keys, evicting the oldest beyond that.
    fn dedup_window<K, FK, FT>(self, window: Duration, max_entries: usize, key_of: FK, time_of: FT) -> DedupWindow<Self, K, FK, FT>
    where
        K: Hash + Eq,
        FK: FnMut(&Self::Item) -> K,
        FT: FnMut(&Self::Item) -> u64,
    {
        DedupWindow::new(self, window, max_entries, key_of, time_of)
    }

    /// Buffer between a bursty producer and a slow consumer with high/low
    /// water marks and an explicit drop-at-capacity policy.
    fn backpressure(self, config: BackpressureConfig) -> Backpressure<Self> {
        Backpressure::new(self, config)
    }

    /// Take from this stream until the given future completes.
    fn take_until_signaled<F>(self, signal: F) -> TakeUntilSignaled<Self, F>
    where
        F: Future,
    {
        TakeUntilSignaled::new(self, signal)
    }

    /// Feed all values into a supermassive black hole and return a Future that completes when done.
    fn drain(self) -> Drain<Self> {
        Drain::new(self)
    }
}

impl<T: Sized + Stream> WeftStreamExt for T {}
