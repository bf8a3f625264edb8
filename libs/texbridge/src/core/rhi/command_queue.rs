// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Host render queue: one dedicated thread executing GPU-side work in
//! submission order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::core::future::{promise, ExchangeFuture};
use crate::core::{BridgeError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum QueueMessage {
    Run { label: &'static str, job: Job },
    Shutdown,
}

/// Serialized render queue.
///
/// Jobs run on the queue thread strictly in the order they were enqueued.
/// A panicking job is logged and does not take the queue down.
pub struct RenderQueue {
    name: String,
    sender: Sender<QueueMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RenderQueue {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = crossbeam_channel::unbounded();
        let thread_name = name.clone();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_queue(&thread_name, receiver))
            .map_err(|e| BridgeError::Gpu(format!("Failed to spawn render queue thread: {}", e)))?;

        tracing::debug!("[RenderQueue] '{}' started", name);
        Ok(Self {
            name,
            sender,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a job. Fails only once the queue has shut down.
    pub fn enqueue<F>(&self, label: &'static str, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(QueueMessage::Run {
                label,
                job: Box::new(job),
            })
            .map_err(|_| BridgeError::Cancelled)
    }

    /// Enqueue a job and observe its result. The future resolves
    /// `Cancelled` if the queue shuts down before running it.
    pub fn enqueue_with_result<T, F>(&self, label: &'static str, job: F) -> ExchangeFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (promise, future) = promise();
        // On send failure the closure (and the promise inside it) is dropped,
        // which resolves the future as cancelled.
        let _ = self.enqueue(label, move || promise.resolve(job()));
        future
    }

    /// Block until every job enqueued before this call has run.
    pub fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        self.enqueue("flush", move || {
            let _ = done_tx.send(());
        })?;
        done_rx.recv().map_err(|_| BridgeError::Cancelled)
    }

    /// Drain outstanding jobs and join the queue thread. Idempotent.
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let _ = self.sender.send(QueueMessage::Shutdown);
        if thread.join().is_err() {
            tracing::error!("[RenderQueue] '{}' thread panicked during shutdown", self.name);
        }
        tracing::debug!("[RenderQueue] '{}' stopped", self.name);
    }
}

impl Drop for RenderQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RenderQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderQueue")
            .field("name", &self.name)
            .field("pending", &self.sender.len())
            .finish()
    }
}

fn run_queue(name: &str, receiver: Receiver<QueueMessage>) {
    while let Ok(message) = receiver.recv() {
        match message {
            QueueMessage::Run { label, job } => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("[RenderQueue] '{}' job '{}' panicked", name, label);
                }
            }
            QueueMessage::Shutdown => break,
        }
    }
    // Jobs enqueued after shutdown was requested are dropped unexecuted.
    drop(receiver);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_jobs_run_in_order() {
        let queue = RenderQueue::new("test-queue").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let log = Arc::clone(&log);
            queue.enqueue("push", move || log.lock().push(i)).unwrap();
        }
        queue.flush().unwrap();
        assert_eq!(*log.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_enqueue_with_result() {
        let queue = RenderQueue::new("test-queue").unwrap();
        let future = queue.enqueue_with_result("answer", || Ok(42u32));
        assert_eq!(future.wait().unwrap(), 42);
    }

    #[test]
    fn test_panicking_job_does_not_stop_queue() {
        let queue = RenderQueue::new("test-queue").unwrap();
        let future = queue.enqueue_with_result::<u32, _>("boom", || panic!("job failure"));
        assert!(future.wait().unwrap_err().is_cancelled());
        assert_eq!(queue.enqueue_with_result("after", || Ok(1u32)).wait().unwrap(), 1);
    }

    #[test]
    fn test_enqueue_after_shutdown_cancels() {
        let queue = RenderQueue::new("test-queue").unwrap();
        queue.shutdown();
        assert!(queue.enqueue("late", || {}).is_err());
        let future = queue.enqueue_with_result("late", || Ok(()));
        assert!(future.wait().unwrap_err().is_cancelled());
    }
}
