use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

/// A one-shot, cloneable cancellation signal.
///
/// Any number of [`Fired`] futures can listen; once [`Trigger::fire`] is
/// called they all complete, including listeners created afterwards. Used
/// together with `take_until_signaled` to tear down correlation pipelines.
#[derive(Debug, Clone, Default)]
pub struct Trigger {
    inner: Arc<Mutex<TriggerInner>>,
}

#[derive(Debug, Default)]
struct TriggerInner {
    fired: bool,
    next_id: usize,
    wakers: FnvHashMap<usize, Waker>,
}

impl Trigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Idempotent.
    pub fn fire(&self) {
        let wakers = {
            let mut inner = self.inner.lock();
            inner.fired = true;
            std::mem::take(&mut inner.wakers)
        };
        for (_, waker) in wakers {
            waker.wake();
        }
    }

    pub fn is_fired(&self) -> bool {
        self.inner.lock().fired
    }

    /// A future that completes once the trigger has fired.
    pub fn listen(&self) -> Fired {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            id
        };
        Fired {
            id,
            inner: self.inner.clone(),
        }
    }
}

/// Future returned by [`Trigger::listen`].
#[derive(Debug)]
pub struct Fired {
    id: usize,
    inner: Arc<Mutex<TriggerInner>>,
}

impl Future for Fired {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.inner.lock();
        if inner.fired {
            Poll::Ready(())
        } else {
            let id = self.id;
            inner.wakers.insert(id, cx.waker().clone());
            Poll::Pending
        }
    }
}

impl Drop for Fired {
    fn drop(&mut self) {
        self.inner.lock().wakers.remove(&self.id);
    }
}
