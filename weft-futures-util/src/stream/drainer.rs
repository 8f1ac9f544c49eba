//! Test aid: run a stream on a local pool until it stalls and hand back what
//! it produced so far, batch by batch.

use futures::executor::LocalPool;
use futures::future::ready;
use futures::stream::{Stream, StreamExt};
use futures::task::LocalSpawnExt;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Iterator over the batches a stream yields between suspension points.
///
/// `next()` returns `Some(vec![..])` with everything produced since the last
/// call (possibly empty) and `None` once the stream has ended. This makes the
/// exact suspension behavior of a combinator testable without timers.
pub struct Drainer<T> {
    items: Arc<Mutex<Vec<T>>>,
    ended: Arc<AtomicBool>,
    pool: LocalPool,
}

impl<T: 'static> Drainer<T> {
    pub fn new<St: Stream<Item = T> + 'static>(stream: St) -> Drainer<T> {
        let items = Arc::new(Mutex::new(Vec::new()));
        let ended = Arc::new(AtomicBool::new(false));

        let sink = items.clone();
        let flag = ended.clone();
        let pool = LocalPool::new();
        pool.spawner()
            .spawn_local(async move {
                let mut stream = Box::pin(stream);
                while let Some(item) = stream.next().await {
                    sink.lock().push(item);
                    ready(()).await;
                }
                flag.store(true, Ordering::Release);
            })
            .expect("cannot spawn stream");

        Drainer { items, ended, pool }
    }
}

impl<T> Iterator for Drainer<T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pool.run_until_stalled();

        let mut items = self.items.lock();
        if !items.is_empty() {
            return Some(std::mem::take(&mut *items));
        }
        if self.ended.load(Ordering::Acquire) {
            return None;
        }
        Some(Vec::new())
    }
}
