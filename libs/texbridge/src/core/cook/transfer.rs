// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Ownership-transfer records and the per-texture ownership state machine.

use crate::core::rhi::{ImageLayout, OsHandle, SemaphoreKind};
use crate::core::{BridgeError, Result};

/// Primitive the receiving side must wait on before touching the texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSync {
    /// Exported semaphore of the releasing side.
    Semaphore { handle: OsHandle, kind: SemaphoreKind },
    /// Keyed mutex on the shared allocation. The record value is the key.
    KeyedMutex,
}

/// One handoff of a shared texture from one engine to the other.
///
/// Produced by the releasing side, consumed exactly once by the acquiring
/// side's next copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRecord {
    /// Layout the releasing side left its image in.
    pub old_layout: ImageLayout,
    /// Layout the acquiring side should move the image to.
    pub new_layout: ImageLayout,
    pub sync: TransferSync,
    /// Timeline wait value or keyed-mutex key. Ignored for binary semaphores.
    pub value: u64,
}

impl TransferRecord {
    pub fn semaphore_kind(&self) -> Option<SemaphoreKind> {
        match self.sync {
            TransferSync::Semaphore { kind, .. } => Some(kind),
            TransferSync::KeyedMutex => None,
        }
    }
}

/// Result of querying the cook engine for a texture's transfer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// The other side released the texture; wait on the record before use.
    Pending(TransferRecord),
    /// No handoff recorded. The texture is free to use.
    NoMatchingEntity,
    /// The query itself failed with an engine-specific code.
    Failed(i32),
}

impl TransferStatus {
    /// Collapse to the record the caller must honor. `NoMatchingEntity` is
    /// success with nothing to wait on.
    pub fn into_record(self) -> Result<Option<TransferRecord>> {
        match self {
            Self::Pending(record) => Ok(Some(record)),
            Self::NoMatchingEntity => Ok(None),
            Self::Failed(code) => Err(BridgeError::TransferFailure(format!(
                "Transfer query failed with code {}",
                code
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Host,
    Cook,
}

/// Who may touch a shared texture right now.
///
/// `HostOwned → TransferRequested(Cook) → CookOwned → TransferRequested(Host) → HostOwned`.
/// A side may also reclaim its own unconsumed handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipState {
    #[default]
    HostOwned,
    TransferRequested { to: Side },
    CookOwned,
}

impl OwnershipState {
    fn owned_by(side: Side) -> Self {
        match side {
            Side::Host => Self::HostOwned,
            Side::Cook => Self::CookOwned,
        }
    }

    pub fn owner(&self) -> Option<Side> {
        match self {
            Self::HostOwned => Some(Side::Host),
            Self::CookOwned => Some(Side::Cook),
            Self::TransferRequested { .. } => None,
        }
    }

    /// `from` finished using the texture and hands it over.
    pub fn release(self, from: Side) -> Result<Self> {
        match self {
            s if s == Self::owned_by(from) => Ok(Self::TransferRequested {
                to: other(from),
            }),
            s => Err(BridgeError::TransferFailure(format!(
                "{:?} cannot release a texture in state {:?}",
                from, s
            ))),
        }
    }

    /// `side` consumed the pending handoff (or found none) and now owns it.
    pub fn acquire(self, side: Side) -> Result<Self> {
        match self {
            Self::TransferRequested { .. } => Ok(Self::owned_by(side)),
            s if s == Self::owned_by(side) => Ok(s),
            s => Err(BridgeError::TransferFailure(format!(
                "{:?} cannot acquire a texture in state {:?} without a pending transfer",
                side, s
            ))),
        }
    }
}

fn other(side: Side) -> Side {
    match side {
        Side::Host => Side::Cook,
        Side::Cook => Side::Host,
    }
}
