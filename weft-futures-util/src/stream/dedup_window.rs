use futures::{ready, stream::Stream, task::Context, task::Poll};
use pin_project_lite::pin_project;
use std::{
    collections::{HashMap, VecDeque},
    hash::Hash,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// Shared counters of a [`DedupWindow`] stage; cheap to clone and safe to
/// read while the stream is running.
#[derive(Debug, Clone, Default)]
pub struct DedupMetrics {
    inner: Arc<DedupCounters>,
}

#[derive(Debug, Default)]
struct DedupCounters {
    processed: AtomicU64,
    duplicates: AtomicU64,
}

impl DedupMetrics {
    /// Items that entered the stage.
    pub fn processed(&self) -> u64 {
        self.inner.processed.load(Ordering::Relaxed)
    }

    /// Items suppressed as duplicates.
    pub fn duplicates(&self) -> u64 {
        self.inner.duplicates.load(Ordering::Relaxed)
    }
}

pin_project! {
    /// Stream for the [`dedup_window`](super::WeftStreamExt::dedup_window) method.
    ///
    /// An item is a duplicate when its key was first seen no more than
    /// `window` away on the item time axis. The cache maps key to first-seen
    /// time; expired entries are evicted as time advances and the oldest
    /// entries are evicted beyond `max_entries`.
    #[must_use = "streams do nothing unless polled"]
    pub struct DedupWindow<St: Stream, K, FK, FT> {
        #[pin]
        stream: St,
        key_of: FK,
        time_of: FT,
        window_ms: u64,
        max_entries: usize,
        first_seen: HashMap<K, u64>,
        // insertion order, for TTL sweeps and the size cap
        order: VecDeque<(K, u64)>,
        metrics: DedupMetrics,
    }
}

impl<St, K, FK, FT> DedupWindow<St, K, FK, FT>
where
    St: Stream,
    K: Hash + Eq,
{
    pub(crate) fn new(stream: St, window: Duration, max_entries: usize, key_of: FK, time_of: FT) -> Self {
        Self {
            stream,
            key_of,
            time_of,
            window_ms: window.as_millis() as u64,
            max_entries: max_entries.max(1),
            first_seen: HashMap::new(),
            order: VecDeque::new(),
            metrics: DedupMetrics::default(),
        }
    }

    /// Handle for reading the stage counters, also after the stream moved on.
    pub fn metrics(&self) -> DedupMetrics {
        self.metrics.clone()
    }
}

impl<St, K, FK, FT> Stream for DedupWindow<St, K, FK, FT>
where
    St: Stream,
    K: Hash + Eq + Clone,
    FK: FnMut(&St::Item) -> K,
    FT: FnMut(&St::Item) -> u64,
{
    type Item = St::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<St::Item>> {
        let mut this = self.project();
        loop {
            let item = match ready!(this.stream.as_mut().poll_next(cx)) {
                None => return Poll::Ready(None),
                Some(item) => item,
            };
            this.metrics.inner.processed.fetch_add(1, Ordering::Relaxed);
            let now = (this.time_of)(&item);
            // expired entries leave the cache as item time advances
            while let Some((key, seen)) = this.order.front() {
                if now.saturating_sub(*seen) > *this.window_ms {
                    this.first_seen.remove(key);
                    this.order.pop_front();
                } else {
                    break;
                }
            }
            let key = (this.key_of)(&item);
            if let Some(seen) = this.first_seen.get(&key) {
                let distance = now.saturating_sub(*seen).max(seen.saturating_sub(now));
                if distance <= *this.window_ms {
                    this.metrics.inner.duplicates.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
            if this.first_seen.len() >= *this.max_entries {
                if let Some((oldest, _)) = this.order.pop_front() {
                    this.first_seen.remove(&oldest);
                }
            }
            this.first_seen.insert(key.clone(), now);
            this.order.push_back((key, now));
            return Poll::Ready(Some(item));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{prelude::*, stream::Drainer};
    use futures::channel::mpsc;
    use futures::executor::block_on;
    use futures::stream::{self, StreamExt};

    // items are (key, time-ms)
    type Item = (u32, u64);
    type TestDedup<St> = DedupWindow<St, u32, fn(&Item) -> u32, fn(&Item) -> u64>;

    fn dedup<St: Stream<Item = Item>>(s: St, window_ms: u64, cap: usize) -> TestDedup<St> {
        s.dedup_window(Duration::from_millis(window_ms), cap, (|i: &Item| i.0) as fn(&Item) -> u32, (|i: &Item| i.1) as fn(&Item) -> u64)
    }

    #[test]
    fn empty_stream() {
        let res = block_on(dedup(stream::empty(), 100, 8).collect::<Vec<_>>());
        assert_eq!(res, vec![]);
    }

    #[test]
    fn suppresses_inside_window_only() {
        let input = vec![(1, 0), (1, 50), (2, 60), (1, 101), (2, 200)];
        let out = block_on(dedup(stream::iter(input), 100, 8).collect::<Vec<_>>());
        // (1,50) is a duplicate of (1,0); (1,101) is past the window of 0;
        // (2,200) is past the window of 60
        assert_eq!(out, vec![(1, 0), (2, 60), (1, 101), (2, 200)]);
    }

    #[test]
    fn counts_processed_and_duplicates() {
        let staged = dedup(stream::iter(vec![(1, 0), (1, 1), (1, 2), (2, 3)]), 100, 8);
        let metrics = staged.metrics();
        let out = block_on(staged.collect::<Vec<_>>());
        assert_eq!(out.len(), 2);
        assert_eq!(metrics.processed(), 4);
        assert_eq!(metrics.duplicates(), 2);
    }

    #[test]
    fn cache_cap_evicts_oldest() {
        // cap of 2: key 1 is evicted when 3 arrives, so its repeat passes
        let input = vec![(1, 0), (2, 1), (3, 2), (1, 3)];
        let out = block_on(dedup(stream::iter(input), 1000, 2).collect::<Vec<_>>());
        assert_eq!(out, vec![(1, 0), (2, 1), (3, 2), (1, 3)]);
    }

    #[test]
    fn works_on_live_channels() {
        let (mut send, recv) = mpsc::unbounded();
        let mut d = Drainer::new(dedup(recv, 100, 8));
        for i in [(1, 0), (1, 10), (2, 20)] {
            send.start_send(i).unwrap();
        }
        assert_eq!(d.next(), Some(vec![(1, 0), (2, 20)]));
        for i in [(2, 30), (3, 40)] {
            send.start_send(i).unwrap();
        }
        assert_eq!(d.next(), Some(vec![(3, 40)]));
    }
}
