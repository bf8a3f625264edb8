// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! RHI device abstraction.
//!
//! `GpuDevice` is the seam to the physical GPU both engines share. The bundled
//! implementation models device memory in host RAM: textures are byte arrays,
//! shareable allocations live in a handle table keyed by [`OsHandle`], and
//! exportable semaphores are published through the same table. This keeps the
//! exchange protocol exercisable without a driver while preserving the
//! ownership rules a driver enforces (handle lifetime, memory budget, layout
//! validity, device loss).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::core::{BridgeError, Result};

use super::sync::{KeyedMutex, Semaphore, SemaphoreKind};
use super::{HandleType, ImageLayout, OsHandle, SharedTextureDescriptor, TextureDescriptor};

/// Identity of one native texture object (one view onto device memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Device memory accounting.
#[derive(Debug, Default)]
struct DeviceAccounting {
    budget: Option<u64>,
    bytes_in_use: Mutex<u64>,
    allocations: AtomicU64,
    frees: AtomicU64,
}

impl DeviceAccounting {
    fn reserve(&self, size: u64) -> Result<()> {
        let mut in_use = self.bytes_in_use.lock();
        if let Some(budget) = self.budget {
            if *in_use + size > budget {
                return Err(BridgeError::AllocationFailure(format!(
                    "Out of device memory: requested {} bytes with {}/{} in use",
                    size, *in_use, budget
                )));
            }
        }
        *in_use += size;
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn free(&self, size: u64) {
        let mut in_use = self.bytes_in_use.lock();
        *in_use = in_use.saturating_sub(size);
        self.frees.fetch_add(1, Ordering::Relaxed);
    }
}

/// Backing memory of one allocation, shared by every view opened on it.
pub(crate) struct TextureMemory {
    bytes: Mutex<Vec<u8>>,
    size: u64,
    valid: AtomicBool,
    keyed_mutex: Option<KeyedMutex>,
    accounting: Arc<DeviceAccounting>,
}

impl Drop for TextureMemory {
    fn drop(&mut self) {
        self.accounting.free(self.size);
    }
}

/// A native texture object.
///
/// Host-local textures own their memory exclusively. Shared textures either
/// created the allocation (exporting side) or opened it from a handle
/// (importing side); the memory is freed when the last view and the last
/// owning handle-table entry are gone.
pub struct NativeTexture {
    id: TextureId,
    desc: TextureDescriptor,
    memory: Arc<TextureMemory>,
    layout: Mutex<ImageLayout>,
    tracks_layout: bool,
    shared: Option<SharedTextureDescriptor>,
    device_uuid: Uuid,
}

impl NativeTexture {
    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.desc
    }

    /// Shareable descriptor, for textures created or opened as shared.
    pub fn shared_descriptor(&self) -> Option<&SharedTextureDescriptor> {
        self.shared.as_ref()
    }

    pub fn device_uuid(&self) -> Uuid {
        self.device_uuid
    }

    /// False once the resource was invalidated underneath us (device loss,
    /// the other engine tearing down its context).
    pub fn is_valid(&self) -> bool {
        self.memory.valid.load(Ordering::Acquire)
    }

    /// Mark the backing allocation lost for every view opened on it.
    pub fn invalidate(&self) {
        self.memory.valid.store(false, Ordering::Release);
    }

    pub fn tracks_layout(&self) -> bool {
        self.tracks_layout
    }

    pub fn layout(&self) -> ImageLayout {
        *self.layout.lock()
    }

    pub(crate) fn set_layout(&self, layout: ImageLayout) {
        *self.layout.lock() = layout;
    }

    pub fn keyed_mutex(&self) -> Option<&KeyedMutex> {
        self.memory.keyed_mutex.as_ref()
    }

    /// Whether both objects view the same device allocation.
    pub fn shares_memory_with(&self, other: &NativeTexture) -> bool {
        Arc::ptr_eq(&self.memory, &other.memory)
    }

    /// Upload texel data (host-side staging upload).
    pub fn write_pixels(&self, data: &[u8]) -> Result<()> {
        if !self.is_valid() {
            return Err(BridgeError::InvalidTexture(format!(
                "Texture {:?} is no longer valid",
                self.id
            )));
        }
        let mut bytes = self.memory.bytes.lock();
        if data.len() != bytes.len() {
            return Err(BridgeError::InvalidTexture(format!(
                "Upload of {} bytes into texture of {} bytes",
                data.len(),
                bytes.len()
            )));
        }
        bytes.copy_from_slice(data);
        Ok(())
    }

    /// Read back texel data.
    pub fn read_pixels(&self) -> Vec<u8> {
        self.memory.bytes.lock().clone()
    }

    /// Copy all texels of `src` into `self`. Extent and format must match.
    pub(crate) fn copy_from(&self, src: &NativeTexture) -> Result<()> {
        check_copy_compatible(src, self)?;
        if self.shares_memory_with(src) {
            return Ok(());
        }
        let src_bytes = src.memory.bytes.lock();
        let mut dst_bytes = self.memory.bytes.lock();
        dst_bytes.copy_from_slice(&src_bytes);
        Ok(())
    }
}

pub(crate) fn check_copy_compatible(src: &NativeTexture, dst: &NativeTexture) -> Result<()> {
    if !src.is_valid() || !dst.is_valid() {
        return Err(BridgeError::InvalidTexture(format!(
            "Copy {:?} -> {:?} references an invalidated texture",
            src.id, dst.id
        )));
    }
    let (s, d) = (src.descriptor(), dst.descriptor());
    if s.width != d.width || s.height != d.height || s.format != d.format {
        return Err(BridgeError::InvalidTexture(format!(
            "Copy {:?} -> {:?} between mismatched textures ({}x{} {} vs {}x{} {})",
            src.id, dst.id, s.width, s.height, s.format, d.width, d.height, d.format
        )));
    }
    Ok(())
}

impl std::fmt::Debug for NativeTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTexture")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .field("shared", &self.shared.map(|s| s.handle))
            .field("valid", &self.is_valid())
            .finish()
    }
}

enum MemoryRef {
    Owning(Arc<TextureMemory>),
    Borrowed(Weak<TextureMemory>),
}

enum HandleEntry {
    Texture {
        desc: TextureDescriptor,
        memory: MemoryRef,
    },
    Semaphore(Arc<Semaphore>),
}

/// Snapshot of device resource counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub bytes_in_use: u64,
    pub allocations: u64,
    pub frees: u64,
    pub open_handles: usize,
}

impl DeviceStats {
    pub fn live_allocations(&self) -> u64 {
        self.allocations - self.frees
    }
}

/// Handle to the GPU shared by the host and the cook engine.
#[derive(Clone)]
pub struct GpuDevice {
    inner: Arc<GpuDeviceInner>,
}

struct GpuDeviceInner {
    uuid: Uuid,
    accounting: Arc<DeviceAccounting>,
    handles: Mutex<HashMap<OsHandle, HandleEntry>>,
    next_handle: AtomicU64,
}

impl GpuDevice {
    /// Create a device with unbounded memory.
    pub fn new() -> Self {
        Self::with_budget(None)
    }

    /// Create a device whose allocations fail beyond `bytes` in use.
    pub fn with_memory_budget(bytes: u64) -> Self {
        Self::with_budget(Some(bytes))
    }

    fn with_budget(budget: Option<u64>) -> Self {
        let device = Self {
            inner: Arc::new(GpuDeviceInner {
                uuid: Uuid::new_v4(),
                accounting: Arc::new(DeviceAccounting {
                    budget,
                    ..Default::default()
                }),
                handles: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(0x100),
            }),
        };
        tracing::debug!(device = %device.uuid(), ?budget, "GPU device created");
        device
    }

    /// Physical device identity used to bind the cook engine's context.
    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    fn next_handle(&self) -> OsHandle {
        OsHandle(self.inner.next_handle.fetch_add(4, Ordering::Relaxed))
    }

    fn allocate_memory(&self, desc: &TextureDescriptor, keyed: bool) -> Result<Arc<TextureMemory>> {
        let size = desc.byte_size().ok_or_else(|| {
            BridgeError::UnsupportedOperation(format!(
                "Cannot allocate texture with format {}",
                desc.format
            ))
        })?;
        if desc.width == 0 || desc.height == 0 {
            return Err(BridgeError::InvalidTexture(format!(
                "Cannot allocate empty texture {}x{}",
                desc.width, desc.height
            )));
        }
        self.inner.accounting.reserve(size)?;
        Ok(Arc::new(TextureMemory {
            bytes: Mutex::new(vec![0; size as usize]),
            size,
            valid: AtomicBool::new(true),
            keyed_mutex: keyed.then(KeyedMutex::new),
            accounting: Arc::clone(&self.inner.accounting),
        }))
    }

    fn make_view(
        &self,
        desc: TextureDescriptor,
        memory: Arc<TextureMemory>,
        tracks_layout: bool,
        shared: Option<SharedTextureDescriptor>,
    ) -> Arc<NativeTexture> {
        Arc::new(NativeTexture {
            id: TextureId(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)),
            desc,
            memory,
            layout: Mutex::new(ImageLayout::Undefined),
            tracks_layout,
            shared,
            device_uuid: self.inner.uuid,
        })
    }

    /// Create a texture private to the calling engine.
    pub fn create_texture(
        &self,
        desc: &TextureDescriptor,
        tracks_layout: bool,
    ) -> Result<Arc<NativeTexture>> {
        let memory = self.allocate_memory(desc, false)?;
        Ok(self.make_view(*desc, memory, tracks_layout, None))
    }

    /// Create a texture whose memory can be opened by the other engine.
    pub fn create_shared_texture(
        &self,
        desc: &TextureDescriptor,
        handle_type: HandleType,
        keyed_mutex: bool,
        tracks_layout: bool,
    ) -> Result<Arc<NativeTexture>> {
        let memory = self.allocate_memory(desc, keyed_mutex)?;
        let handle = self.next_handle();
        let memory_ref = match handle_type {
            HandleType::Duplicate => MemoryRef::Owning(Arc::clone(&memory)),
            HandleType::SameProcess => MemoryRef::Borrowed(Arc::downgrade(&memory)),
        };
        self.inner.handles.lock().insert(
            handle,
            HandleEntry::Texture {
                desc: *desc,
                memory: memory_ref,
            },
        );
        let shared = SharedTextureDescriptor {
            desc: *desc,
            handle,
            handle_type,
        };
        tracing::trace!(%handle, ?handle_type, "Created shared texture");
        Ok(self.make_view(*desc, memory, tracks_layout, Some(shared)))
    }

    /// Open a texture shared by the other engine.
    pub fn open_shared_texture(
        &self,
        shared: &SharedTextureDescriptor,
        tracks_layout: bool,
    ) -> Result<Arc<NativeTexture>> {
        let memory = {
            let handles = self.inner.handles.lock();
            match handles.get(&shared.handle) {
                Some(HandleEntry::Texture { desc, memory }) => {
                    if desc.width != shared.desc.width
                        || desc.height != shared.desc.height
                        || desc.format != shared.desc.format
                    {
                        return Err(BridgeError::InvalidTexture(format!(
                            "Handle {} describes {:?}, caller expected {:?}",
                            shared.handle, desc, shared.desc
                        )));
                    }
                    match memory {
                        MemoryRef::Owning(memory) => Some(Arc::clone(memory)),
                        MemoryRef::Borrowed(weak) => weak.upgrade(),
                    }
                }
                _ => None,
            }
        };
        let memory = memory.ok_or_else(|| {
            BridgeError::InvalidTexture(format!("Handle {} does not name a live texture", shared.handle))
        })?;
        Ok(self.make_view(shared.desc, memory, tracks_layout, Some(*shared)))
    }

    /// Close a handle-table entry. Returns false if the handle was unknown.
    pub fn close_handle(&self, handle: OsHandle) -> bool {
        self.inner.handles.lock().remove(&handle).is_some()
    }

    /// Create a semaphore, publishing it in the handle table when `exportable`.
    pub fn create_semaphore(&self, kind: SemaphoreKind, exportable: bool) -> Arc<Semaphore> {
        let semaphore = Arc::new(Semaphore::new(kind));
        if exportable {
            let handle = self.next_handle();
            semaphore.set_os_handle(handle);
            self.inner
                .handles
                .lock()
                .insert(handle, HandleEntry::Semaphore(Arc::clone(&semaphore)));
        }
        semaphore
    }

    /// Import a semaphore exported by the other engine.
    pub fn import_semaphore(&self, handle: OsHandle) -> Result<Arc<Semaphore>> {
        match self.inner.handles.lock().get(&handle) {
            Some(HandleEntry::Semaphore(semaphore)) => Ok(Arc::clone(semaphore)),
            _ => Err(BridgeError::TransferFailure(format!(
                "Handle {} does not name an exported semaphore",
                handle
            ))),
        }
    }

    pub fn stats(&self) -> DeviceStats {
        let accounting = &self.inner.accounting;
        DeviceStats {
            bytes_in_use: *accounting.bytes_in_use.lock(),
            allocations: accounting.allocations.load(Ordering::Relaxed),
            frees: accounting.frees.load(Ordering::Relaxed),
            open_handles: self.inner.handles.lock().len(),
        }
    }
}

impl Default for GpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDevice")
            .field("uuid", &self.inner.uuid)
            .field("stats", &self.stats())
            .finish()
    }
}
