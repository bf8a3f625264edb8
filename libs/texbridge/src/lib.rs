// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! GPU texture exchange between a host renderer and an independently
//! scheduled cook engine sharing the same device.
//!
//! The host exports textures to cook engine inputs and imports cook engine
//! outputs through [`TextureBridge`]. Every exchange is asynchronous and keyed
//! by parameter name; shared textures and host destinations are pooled across
//! frames and handed between the engines with an ownership-transfer handshake
//! (keyed mutexes, shared fences or semaphores, depending on the backend).

// Suppress pedantic clippy warnings that are intentional design choices
#![allow(clippy::too_many_arguments)] // Backend hooks take the full transfer context
#![allow(clippy::new_without_default)] // Constructors with side effects stay explicit

pub mod core;

pub use crate::core::{
    cook::{CookInstance, CookTexture, LoopbackInstance, TextureEvent},
    exchange::{ExportOutput, ExportParams, ImportOutput, ImportParams},
    init_tracing,
    provider::{create_resource_provider, create_resource_provider_by_name, ProviderSettings, ResourceProvider},
    rhi::{GpuDevice, HostTexture, PixelFormat, RhiBackend, SemaphoreKind, TextureDescriptor},
    BridgeConfig, BridgeError, BridgeStats, ExchangeFuture, FrameData, Result, SuspendOutcome,
    TextureBridge,
};
