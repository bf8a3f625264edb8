// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Reference-counted tracker for in-flight exchange work.
//!
//! Every export/import holds a [`TaskToken`] from request until its GPU work
//! is enqueued. Teardown calls [`TaskSuspender::suspend`], which refuses new
//! tokens and resolves once the live ones are gone.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::future::{promise, ExchangeFuture, Promise};

/// Resolution of a suspend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspendOutcome {
    /// Tasks that were still outstanding when this suspend call was made.
    pub drained_tasks: usize,
}

#[derive(Default)]
struct SuspenderState {
    active: usize,
    suspended: bool,
    waiters: Vec<(usize, Promise<SuspendOutcome>)>,
}

#[derive(Clone, Default)]
pub struct TaskSuspender {
    state: Arc<Mutex<SuspenderState>>,
}

/// Keeps its suspender active until dropped.
#[must_use = "dropping the token ends the task immediately"]
pub struct TaskToken {
    state: Arc<Mutex<SuspenderState>>,
}

impl TaskSuspender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Returns `None` once suspension has begun.
    pub fn start_task(&self) -> Option<TaskToken> {
        let mut state = self.state.lock();
        if state.suspended {
            return None;
        }
        state.active += 1;
        Some(TaskToken {
            state: Arc::clone(&self.state),
        })
    }

    /// Stop accepting tasks and resolve once every outstanding token is gone.
    ///
    /// Idempotent: each call gets its own future, all of which resolve.
    pub fn suspend(&self) -> ExchangeFuture<SuspendOutcome> {
        let (promise, future) = promise();
        let mut state = self.state.lock();
        let first = !state.suspended;
        state.suspended = true;
        let outstanding = state.active;

        if outstanding == 0 {
            drop(state);
            promise.fulfill(SuspendOutcome { drained_tasks: 0 });
        } else {
            state.waiters.push((outstanding, promise));
            drop(state);
        }

        if first {
            tracing::debug!(outstanding, "[TaskSuspender] Suspending");
        }
        future
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    pub fn active_tasks(&self) -> usize {
        self.state.lock().active
    }
}

impl std::fmt::Debug for TaskSuspender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskSuspender")
            .field("active", &state.active)
            .field("suspended", &state.suspended)
            .finish()
    }
}

impl Drop for TaskToken {
    fn drop(&mut self) {
        let waiters = {
            let mut state = self.state.lock();
            state.active -= 1;
            if state.active == 0 && state.suspended {
                std::mem::take(&mut state.waiters)
            } else {
                Vec::new()
            }
        };
        for (drained_tasks, promise) in waiters {
            promise.fulfill(SuspendOutcome { drained_tasks });
        }
    }
}

impl std::fmt::Debug for TaskToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TaskToken")
    }
}
