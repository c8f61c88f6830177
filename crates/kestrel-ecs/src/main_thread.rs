//! Completions posted from background threads and run on the simulation
//! thread at the start of the next step.
//!
//! Asset loads, pathfinding queries and similar jobs finish off-thread but
//! must touch the world on the thread that owns it. They hold a cloneable
//! [`MainThreadSender`] and post closures; [`World::step`] drains the queue
//! before any system runs. [`promise`] covers the typed case where a value
//! is handed back and polled rather than applied to the world.
//!
//! [`World::step`]: crate::world::World::step

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};

use crate::world::World;

/// A unit of work run against the world on the simulation thread.
pub type MainThreadJob = Box<dyn FnOnce(&mut World) + Send>;

/// Receiving half, owned by the world.
#[derive(Debug)]
pub(crate) struct MainThreadQueue {
    sender: Sender<MainThreadJob>,
    receiver: Receiver<MainThreadJob>,
}

impl MainThreadQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub(crate) fn sender(&self) -> MainThreadSender {
        MainThreadSender {
            sender: self.sender.clone(),
        }
    }

    /// Everything posted so far. Jobs posted while these run wait for the
    /// next drain.
    pub(crate) fn take_pending(&self) -> Vec<MainThreadJob> {
        self.receiver.try_iter().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }
}

/// Cloneable handle for posting work to a world's simulation thread.
#[derive(Clone)]
pub struct MainThreadSender {
    sender: Sender<MainThreadJob>,
}

impl MainThreadSender {
    /// Queue `job`. Returns `false` if the world has been dropped.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut World) + Send + 'static,
    {
        match self.sender.send(Box::new(job)) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("main-thread job posted after the world was dropped");
                false
            }
        }
    }
}

impl std::fmt::Debug for MainThreadSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadSender")
            .field("pending", &self.sender.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Promise / Completion
// ---------------------------------------------------------------------------

/// Create a one-shot channel for a single value.
pub fn promise<T: Send>() -> (Promise<T>, Completion<T>) {
    let (sender, receiver) = bounded(1);
    (
        Promise {
            receiver,
            value: None,
        },
        Completion { sender },
    )
}

/// Polled on the simulation thread.
#[derive(Debug)]
pub struct Promise<T> {
    receiver: Receiver<T>,
    value: Option<T>,
}

impl<T> Promise<T> {
    /// Whether the value has arrived.
    pub fn is_ready(&mut self) -> bool {
        self.poll();
        self.value.is_some()
    }

    /// Take the value if it has arrived.
    pub fn try_take(&mut self) -> Option<T> {
        self.poll();
        self.value.take()
    }

    /// The completion side was dropped without sending.
    pub fn is_abandoned(&mut self) -> bool {
        if self.value.is_some() {
            return false;
        }
        match self.receiver.try_recv() {
            Ok(value) => {
                self.value = Some(value);
                false
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => true,
        }
    }

    fn poll(&mut self) {
        if self.value.is_none() {
            self.value = self.receiver.try_recv().ok();
        }
    }
}

/// Fulfilled from any thread, at most once.
#[derive(Debug)]
pub struct Completion<T> {
    sender: Sender<T>,
}

impl<T> Completion<T> {
    /// Deliver the value. Returns `false` if the promise was dropped.
    pub fn complete(self, value: T) -> bool {
        self.sender.send(value).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promise_is_fulfilled_across_threads() {
        let (mut promise, completion) = promise::<u32>();
        assert!(!promise.is_ready());
        std::thread::spawn(move || {
            completion.complete(42);
        })
        .join()
        .unwrap();
        assert!(promise.is_ready());
        assert_eq!(promise.try_take(), Some(42));
        assert_eq!(promise.try_take(), None);
    }

    #[test]
    fn dropped_completion_abandons_promise() {
        let (mut promise, completion) = promise::<u32>();
        drop(completion);
        assert!(promise.is_abandoned());
    }

    #[test]
    fn dropped_promise_rejects_completion() {
        let (promise, completion) = promise::<u32>();
        drop(promise);
        assert!(!completion.complete(1));
    }
}
