// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Cross-engine synchronization primitives.
//!
//! Both primitives are shareable through the device handle table, so the cook
//! engine and the host observe the same payload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::{BridgeError, Result};

use super::OsHandle;

static NEXT_SEMAPHORE_ID: AtomicU64 = AtomicU64::new(1);

/// Semaphore flavor. Backend code branches on this for every wait/signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemaphoreKind {
    /// Single payload bit. A wait consumes the signal.
    Binary,
    /// Monotonically increasing 64-bit counter.
    Timeline,
}

#[derive(Debug)]
struct SemaphoreState {
    value: u64,
    signaled: bool,
}

/// Semaphore wrapper shared between the two engines.
pub struct Semaphore {
    id: u64,
    kind: SemaphoreKind,
    state: Mutex<SemaphoreState>,
    changed: Condvar,
    handle: Mutex<Option<OsHandle>>,
}

impl Semaphore {
    pub fn new(kind: SemaphoreKind) -> Self {
        Self {
            id: NEXT_SEMAPHORE_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            state: Mutex::new(SemaphoreState {
                value: 0,
                signaled: false,
            }),
            changed: Condvar::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> SemaphoreKind {
        self.kind
    }

    /// Last signaled timeline value (always 0 for binary semaphores).
    pub fn value(&self) -> u64 {
        self.state.lock().value
    }

    pub fn is_signaled(&self) -> bool {
        let state = self.state.lock();
        match self.kind {
            SemaphoreKind::Binary => state.signaled,
            SemaphoreKind::Timeline => state.value > 0,
        }
    }

    /// OS handle, once exported through the device.
    pub fn os_handle(&self) -> Option<OsHandle> {
        *self.handle.lock()
    }

    pub(crate) fn set_os_handle(&self, handle: OsHandle) {
        *self.handle.lock() = Some(handle);
    }

    /// Signal the semaphore.
    ///
    /// Timeline values must strictly increase. A binary semaphore must be
    /// unsignaled; `value` is ignored for it.
    pub fn signal(&self, value: u64) -> Result<()> {
        let mut state = self.state.lock();
        match self.kind {
            SemaphoreKind::Timeline => {
                if value <= state.value {
                    return Err(BridgeError::TransferFailure(format!(
                        "Timeline semaphore {} signaled with non-increasing value {} (current {})",
                        self.id, value, state.value
                    )));
                }
                state.value = value;
            }
            SemaphoreKind::Binary => {
                if state.signaled {
                    return Err(BridgeError::TransferFailure(format!(
                        "Binary semaphore {} signaled twice without a wait",
                        self.id
                    )));
                }
                state.signaled = true;
            }
        }
        self.changed.notify_all();
        Ok(())
    }

    /// Block until the semaphore reaches `value` (timeline) or is signaled
    /// (binary, consuming the signal).
    pub fn wait(&self, value: u64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let ready = match self.kind {
                SemaphoreKind::Timeline => state.value >= value,
                SemaphoreKind::Binary => state.signaled,
            };
            if ready {
                if self.kind == SemaphoreKind::Binary {
                    state.signaled = false;
                }
                return Ok(());
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return Err(BridgeError::TransferFailure(format!(
                    "Timed out after {:?} waiting on semaphore {} for value {}",
                    timeout, self.id, value
                )));
            }
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("value", &state.value)
            .field("signaled", &state.signaled)
            .finish()
    }
}

#[derive(Debug)]
struct KeyedState {
    key: u64,
    held: bool,
}

/// Keyed mutex guarding a shared allocation on the immediate backend.
///
/// `acquire(k)` succeeds only once the previous holder released with key `k`.
pub struct KeyedMutex {
    state: Mutex<KeyedState>,
    changed: Condvar,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(KeyedState {
                key: 0,
                held: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Key the next acquirer must present.
    pub fn current_key(&self) -> u64 {
        self.state.lock().key
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    /// CPU wait until the mutex is free and released with `key`.
    pub fn acquire(&self, key: u64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.held || state.key != key {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return Err(BridgeError::TransferFailure(format!(
                    "Timed out after {:?} acquiring keyed mutex with key {} (current key {}, held {})",
                    timeout, key, state.key, state.held
                )));
            }
        }
        state.held = true;
        Ok(())
    }

    pub fn release(&self, key: u64) -> Result<()> {
        let mut state = self.state.lock();
        if !state.held {
            return Err(BridgeError::TransferFailure(
                "Keyed mutex released without being acquired".into(),
            ));
        }
        state.held = false;
        state.key = key;
        self.changed.notify_all();
        Ok(())
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}
