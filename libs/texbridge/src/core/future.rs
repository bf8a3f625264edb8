// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Single-shot promise/future pair used across the any-thread → render-queue
//! → any-thread pipeline.
//!
//! An [`ExchangeFuture`] can be awaited, blocked on with a timeout, or given a
//! continuation with [`ExchangeFuture::on_complete`]. Continuations run on the
//! thread that resolves the promise (see [`ExecutionContext`]). Dropping a
//! [`Promise`] without resolving it resolves the future with
//! [`BridgeError::Cancelled`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::{BridgeError, Result};

/// Where a pipeline stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// The thread that issued the request.
    Caller,
    /// The serialized render queue thread.
    RenderQueue,
    /// Whichever thread resolved the previous stage.
    AnyThread,
}

type Continuation<T> = Box<dyn FnOnce(Result<T>) + Send>;

enum Slot<T> {
    Pending {
        waker: Option<Waker>,
        continuation: Option<Continuation<T>>,
    },
    Ready(Result<T>),
    Taken,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Write side of an [`ExchangeFuture`].
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

/// Read side of a [`Promise`].
#[must_use = "futures resolve with the operation's result"]
pub struct ExchangeFuture<T> {
    shared: Arc<Shared<T>>,
}

/// Create a connected promise/future pair.
pub fn promise<T>() -> (Promise<T>, ExchangeFuture<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Pending {
            waker: None,
            continuation: None,
        }),
        ready: Condvar::new(),
    });
    (
        Promise {
            shared: Some(Arc::clone(&shared)),
        },
        ExchangeFuture { shared },
    )
}

impl<T> Promise<T> {
    pub fn resolve(mut self, result: Result<T>) {
        if let Some(shared) = self.shared.take() {
            complete(&shared, result);
        }
    }

    pub fn fulfill(self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn reject(self, error: BridgeError) {
        self.resolve(Err(error));
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            complete(&shared, Err(BridgeError::Cancelled));
        }
    }
}

fn complete<T>(shared: &Shared<T>, result: Result<T>) {
    let mut slot = shared.slot.lock();
    let previous = std::mem::replace(&mut *slot, Slot::Taken);
    match previous {
        Slot::Pending {
            continuation: Some(continuation),
            ..
        } => {
            drop(slot);
            continuation(result);
        }
        Slot::Pending { waker, .. } => {
            *slot = Slot::Ready(result);
            drop(slot);
            shared.ready.notify_all();
            if let Some(waker) = waker {
                waker.wake();
            }
        }
        other => *slot = other,
    }
}

impl<T> ExchangeFuture<T> {
    /// A future that is already resolved.
    pub fn ready(result: Result<T>) -> Self {
        let (promise, future) = promise();
        promise.resolve(result);
        future
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.slot.lock(), Slot::Ready(_))
    }

    /// Block until resolved.
    ///
    /// Do not call from the render queue thread for work that is itself
    /// queued behind the caller.
    pub fn wait(self) -> Result<T> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Slot::Ready(_) = &*slot {
                return take_ready(&mut slot);
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// Block until resolved or `timeout` elapses. On timeout the future is
    /// handed back so the caller can keep waiting or drop it.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<T>, Self> {
        let deadline = Instant::now() + timeout;
        {
            let mut slot = self.shared.slot.lock();
            loop {
                if let Slot::Ready(_) = &*slot {
                    return Ok(take_ready(&mut slot));
                }
                if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                    if let Slot::Ready(_) = &*slot {
                        return Ok(take_ready(&mut slot));
                    }
                    break;
                }
            }
        }
        Err(self)
    }

    /// Register a continuation. Runs immediately on this thread if the
    /// future is already resolved, otherwise on the resolving thread.
    pub fn on_complete<F>(self, continuation: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let mut slot = self.shared.slot.lock();
        match &mut *slot {
            Slot::Pending {
                continuation: pending,
                ..
            } => {
                *pending = Some(Box::new(continuation));
            }
            Slot::Ready(_) => {
                let result = take_ready(&mut slot);
                drop(slot);
                continuation(result);
            }
            Slot::Taken => {}
        }
    }

    /// Chain a transformation, producing a new future.
    pub fn map<U, F>(self, f: F) -> ExchangeFuture<U>
    where
        T: 'static,
        U: Send + 'static,
        F: FnOnce(Result<T>) -> Result<U> + Send + 'static,
    {
        let (next, future) = promise();
        self.on_complete(move |result| next.resolve(f(result)));
        future
    }
}

fn take_ready<T>(slot: &mut Slot<T>) -> Result<T> {
    match std::mem::replace(slot, Slot::Taken) {
        Slot::Ready(result) => result,
        _ => Err(BridgeError::Cancelled),
    }
}

impl<T> Future for ExchangeFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        match &mut *slot {
            Slot::Ready(_) => Poll::Ready(take_ready(&mut slot)),
            Slot::Pending { waker, .. } => {
                *waker = Some(cx.waker().clone());
                Poll::Pending
            }
            Slot::Taken => Poll::Ready(Err(BridgeError::Cancelled)),
        }
    }
}

impl<T> std::fmt::Debug for ExchangeFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}
