// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Render Hardware Interface (RHI) - backend-neutral GPU device model.

mod backend;
mod command_buffer;
mod command_queue;
mod device;
mod pixel_format;
mod sync;
mod texture;

pub use backend::RhiBackend;
pub use command_buffer::CommandBuffer;
pub use command_queue::RenderQueue;
pub use device::{DeviceStats, GpuDevice, NativeTexture, TextureId};
pub use pixel_format::PixelFormat;
pub use sync::{KeyedMutex, Semaphore, SemaphoreKind};
pub use texture::{
    HandleType, HostTexture, HostTextureId, ImageLayout, OsHandle, SharedTextureDescriptor,
    TextureDescriptor, TextureOrigin,
};
