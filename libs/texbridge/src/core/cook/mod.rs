// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Cook engine collaborator: instance trait, transfer protocol types and an
//! in-process loopback engine.

mod instance;
mod loopback;
mod transfer;

pub use instance::{CookInstance, CookTexture, CookTextureId, TextureCallback, TextureEvent};
pub use loopback::{CookReport, LoopbackInstance, OutputProducer};
pub use transfer::{OwnershipState, Side, TransferRecord, TransferStatus, TransferSync};
