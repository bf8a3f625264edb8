// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame-scoped ordering of texture input updates.
//!
//! Every input update dispatched for a frame holds an [`InputUpdate`] until it
//! reaches a terminal state. A frame counts as finished once no update for it
//! or any earlier frame is still active.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::frame::FrameData;
use crate::core::future::{promise, ExchangeFuture, Promise};

/// Orders updates by frame, then by dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputUpdateId {
    pub frame: u64,
    pub sequence: u64,
}

#[derive(Default)]
struct TrackerState {
    next_sequence: u64,
    active: BTreeSet<InputUpdateId>,
    /// Keyed by the frame waited on and a registration sequence.
    listeners: BTreeMap<InputUpdateId, Promise<FrameData>>,
}

impl TrackerState {
    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Listeners whose frame no longer has an active update at or before it.
    fn take_finished(&mut self) -> Vec<(InputUpdateId, Promise<FrameData>)> {
        let oldest_active = self.active.first().map(|id| id.frame);
        let mut finished = Vec::new();
        while let Some(entry) = self.listeners.first_entry() {
            if oldest_active.is_some_and(|oldest| oldest <= entry.key().frame) {
                break;
            }
            let key = *entry.key();
            finished.push((key, entry.remove()));
        }
        finished
    }
}

#[derive(Clone, Default)]
pub struct FrameUpdateTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl FrameUpdateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an update dispatched for `frame`.
    pub fn begin_update(&self, frame: FrameData) -> InputUpdate {
        let mut state = self.state.lock();
        let id = InputUpdateId {
            frame: frame.frame_id,
            sequence: state.next_sequence(),
        };
        state.active.insert(id);
        InputUpdate {
            state: Arc::clone(&self.state),
            id,
        }
    }

    /// Resolves once every update for `frame` and earlier frames is terminal.
    pub fn on_updates_finished(&self, frame: FrameData) -> ExchangeFuture<FrameData> {
        let (promise, future) = promise();
        let finished = {
            let mut state = self.state.lock();
            let key = InputUpdateId {
                frame: frame.frame_id,
                sequence: state.next_sequence(),
            };
            state.listeners.insert(key, promise);
            state.take_finished()
        };
        resolve(finished);
        future
    }

    pub fn active_updates(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Oldest update still in flight.
    pub fn oldest_active(&self) -> Option<InputUpdateId> {
        self.state.lock().active.first().copied()
    }
}

impl std::fmt::Debug for FrameUpdateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FrameUpdateTracker")
            .field("active", &state.active.len())
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

fn resolve(finished: Vec<(InputUpdateId, Promise<FrameData>)>) {
    for (key, promise) in finished {
        promise.fulfill(FrameData::new(key.frame));
    }
}

/// An in-flight input update. Dropping it marks the update terminal.
#[must_use = "dropping the update marks it finished"]
pub struct InputUpdate {
    state: Arc<Mutex<TrackerState>>,
    id: InputUpdateId,
}

impl InputUpdate {
    pub fn id(&self) -> InputUpdateId {
        self.id
    }
}

impl Drop for InputUpdate {
    fn drop(&mut self) {
        let finished = {
            let mut state = self.state.lock();
            state.active.remove(&self.id);
            state.take_finished()
        };
        resolve(finished);
    }
}

impl std::fmt::Debug for InputUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("InputUpdate").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_updates_resolves_immediately() {
        let tracker = FrameUpdateTracker::new();
        let done = tracker.on_updates_finished(FrameData::new(4));
        assert_eq!(done.wait().unwrap(), FrameData::new(4));
    }

    #[test]
    fn test_waits_for_earlier_frames_too() {
        let tracker = FrameUpdateTracker::new();
        let early = tracker.begin_update(FrameData::new(1));
        let current = tracker.begin_update(FrameData::new(2));
        let later = tracker.begin_update(FrameData::new(3));

        let done = tracker.on_updates_finished(FrameData::new(2));
        drop(current);
        assert!(!done.is_ready());
        drop(early);
        assert!(done.is_ready());
        assert_eq!(tracker.active_updates(), 1);
        drop(later);
        assert_eq!(tracker.active_updates(), 0);
    }

    #[test]
    fn test_listeners_resolve_in_frame_order() {
        let tracker = FrameUpdateTracker::new();
        let first = tracker.begin_update(FrameData::new(5));
        let second = tracker.begin_update(FrameData::new(6));
        let five = tracker.on_updates_finished(FrameData::new(5));
        let six = tracker.on_updates_finished(FrameData::new(6));

        drop(first);
        assert!(five.is_ready());
        assert!(!six.is_ready());
        drop(second);
        assert!(six.is_ready());
    }

    #[test]
    fn test_update_ids_are_ordered() {
        let tracker = FrameUpdateTracker::new();
        let a = tracker.begin_update(FrameData::new(9));
        let b = tracker.begin_update(FrameData::new(9));
        assert!(a.id() < b.id());
        assert_eq!(tracker.oldest_active(), Some(a.id()));
    }
}
