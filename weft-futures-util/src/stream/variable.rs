//! An observable variable: the subscription primitive behind the engine's
//! typed event hooks. Observers are streams that yield the most recent value
//! set after their last poll; intermediate values may be skipped.

use fnv::FnvHashMap;
use futures::stream::{FusedStream, Stream};
use parking_lot::Mutex;
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

#[derive(Debug)]
struct Slot {
    delivered: bool,
    waker: Option<Waker>,
}

#[derive(Debug)]
struct Shared<T> {
    latest: T,
    writer_gone: bool,
    next_id: usize,
    observers: FnvHashMap<usize, Slot>,
}

impl<T> Shared<T> {
    fn publish(&mut self, value: T) {
        self.latest = value;
        for slot in self.observers.values_mut() {
            slot.delivered = false;
            if let Some(waker) = slot.waker.take() {
                waker.wake();
            }
        }
    }
}

/// A value that can be observed by any number of [`Observer`] streams.
///
/// Setting the value never fails and never blocks, also with zero observers.
#[derive(Debug)]
pub struct Variable<T> {
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> Variable<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                latest: value,
                writer_gone: false,
                next_id: 0,
                observers: FnvHashMap::default(),
            })),
        }
    }

    /// Publish a value and wake all observers.
    pub fn set(&self, value: T) {
        self.shared.lock().publish(value);
    }

    /// Create an observer stream; it will first yield the current value.
    pub fn observer(&self) -> Observer<T> {
        let mut shared = self.shared.lock();
        let id = shared.next_id;
        shared.next_id += 1;
        if !shared.writer_gone {
            shared.observers.insert(
                id,
                Slot {
                    delivered: false,
                    waker: None,
                },
            );
        }
        Observer {
            id,
            shared: self.shared.clone(),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.shared.lock().observers.len()
    }

    /// Read a projection of the current value without cloning it.
    pub fn project<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        f(&self.shared.lock().latest)
    }
}

impl<T: Clone> Variable<T> {
    pub fn get_cloned(&self) -> T {
        self.shared.lock().latest.clone()
    }
}

impl<T> Clone for Variable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Default> Default for Variable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Stream of values observed from a [`Variable`]; see [`Variable::observer`].
#[derive(Debug)]
pub struct Observer<T> {
    id: usize,
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> Unpin for Observer<T> {}

impl<T: Clone> Stream for Observer<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut shared = self.shared.lock();
        if shared.writer_gone {
            // deliver the final value exactly once, then end
            return match shared.observers.remove(&self.id) {
                Some(slot) if !slot.delivered => Poll::Ready(Some(shared.latest.clone())),
                _ => Poll::Ready(None),
            };
        }
        match shared.observers.get_mut(&self.id) {
            Some(slot) if slot.delivered => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
            Some(slot) => {
                slot.delivered = true;
                Poll::Ready(Some(shared.latest.clone()))
            }
            // registration was refused because the writer was already gone
            None => Poll::Ready(None),
        }
    }
}

impl<T: Clone> FusedStream for Observer<T> {
    fn is_terminated(&self) -> bool {
        let shared = self.shared.lock();
        shared.writer_gone && !shared.observers.contains_key(&self.id)
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        let mut shared = self.shared.lock();
        let id = shared.next_id;
        shared.next_id += 1;
        if !shared.writer_gone {
            shared.observers.insert(
                id,
                Slot {
                    delivered: false,
                    waker: None,
                },
            );
        }
        drop(shared);
        Observer {
            id,
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Observer<T> {
    fn drop(&mut self) {
        self.shared.lock().observers.remove(&self.id);
    }
}

/// Marks the writer side as gone when the last [`Variable`] handle drops,
/// ending all observer streams after their final value.
pub struct VariableGuard<T>(Variable<T>);

impl<T> VariableGuard<T> {
    pub fn new(variable: Variable<T>) -> Self {
        Self(variable)
    }
}

impl<T> std::ops::Deref for VariableGuard<T> {
    type Target = Variable<T>;
    fn deref(&self) -> &Variable<T> {
        &self.0
    }
}

impl<T> Drop for VariableGuard<T> {
    fn drop(&mut self) {
        let mut shared = self.0.shared.lock();
        shared.writer_gone = true;
        for slot in shared.observers.values_mut() {
            if let Some(waker) = slot.waker.take() {
                waker.wake();
            }
        }
    }
}
