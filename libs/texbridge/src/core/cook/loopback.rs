// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-process cook engine sharing the host's [`GpuDevice`].
//!
//! Each [`LoopbackInstance::cook`] consumes the bound inputs through the
//! transfer protocol, runs the per-output producers and publishes the outputs
//! back through the protocol, exactly as an external engine would. The
//! instance lock is held for the whole cook, so host-side queries observe the
//! engine either before or after a cook, never in the middle of one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::core::frame::FrameData;
use crate::core::rhi::{
    CommandBuffer, GpuDevice, HandleType, ImageLayout, NativeTexture, PixelFormat, RhiBackend,
    Semaphore, SemaphoreKind, TextureDescriptor,
};
use crate::core::{BridgeError, Result};

use super::{
    CookInstance, CookTexture, CookTextureId, OwnershipState, Side, TextureCallback, TextureEvent,
    TransferRecord, TransferStatus, TransferSync,
};

/// Produces the texel bytes of one output for a frame.
pub type OutputProducer = Box<dyn Fn(FrameData, &TextureDescriptor) -> Vec<u8> + Send + Sync>;

/// What one cook did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CookReport {
    pub frame: FrameData,
    pub inputs_read: usize,
    /// Bound inputs the host has not handed over yet.
    pub inputs_skipped: usize,
    pub outputs_written: usize,
}

#[derive(Default)]
struct TransferSlot {
    state: OwnershipState,
    record: Option<TransferRecord>,
}

/// The engine's own signaling state for one texture.
#[derive(Default)]
struct CookSync {
    semaphore: Option<Arc<Semaphore>>,
    value: u64,
    key: u64,
}

struct OutputSlot {
    desc: TextureDescriptor,
    producer: OutputProducer,
    texture: Option<CookTexture>,
}

struct LoopbackState {
    context: Option<(RhiBackend, Uuid)>,
    required_layout: ImageLayout,
    inputs: BTreeMap<String, CookTexture>,
    last_inputs: HashMap<String, Vec<u8>>,
    outputs: BTreeMap<String, OutputSlot>,
    transfers: HashMap<CookTextureId, TransferSlot>,
    sync: HashMap<CookTextureId, CookSync>,
    views: HashMap<CookTextureId, Arc<NativeTexture>>,
    callbacks: HashMap<CookTextureId, TextureCallback>,
    failure: Option<i32>,
    cooks: u64,
}

type PendingEvents = Vec<(TextureCallback, TextureEvent)>;

pub struct LoopbackInstance {
    device: GpuDevice,
    semaphore_kind: SemaphoreKind,
    formats: Vec<PixelFormat>,
    wait_timeout: Duration,
    state: Mutex<LoopbackState>,
}

impl LoopbackInstance {
    pub fn new(device: GpuDevice) -> Self {
        Self {
            device,
            semaphore_kind: SemaphoreKind::Timeline,
            formats: PixelFormat::EXCHANGEABLE.to_vec(),
            wait_timeout: Duration::from_secs(5),
            state: Mutex::new(LoopbackState {
                context: None,
                required_layout: ImageLayout::ShaderRead,
                inputs: BTreeMap::new(),
                last_inputs: HashMap::new(),
                outputs: BTreeMap::new(),
                transfers: HashMap::new(),
                sync: HashMap::new(),
                views: HashMap::new(),
                callbacks: HashMap::new(),
                failure: None,
                cooks: 0,
            }),
        }
    }

    /// Semaphore flavor used on the explicit backend.
    pub fn with_semaphore_kind(mut self, kind: SemaphoreKind) -> Self {
        self.semaphore_kind = kind;
        self
    }

    pub fn with_formats(mut self, formats: Vec<PixelFormat>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn backend(&self) -> Option<RhiBackend> {
        self.state.lock().context.map(|(backend, _)| backend)
    }

    pub fn cook_count(&self) -> u64 {
        self.state.lock().cooks
    }

    /// Declare an output parameter.
    pub fn add_output(&self, param: impl Into<String>, desc: TextureDescriptor, producer: OutputProducer) {
        self.state.lock().outputs.insert(
            param.into(),
            OutputSlot {
                desc,
                producer,
                texture: None,
            },
        );
    }

    /// Change an output's size or format. Takes effect on the next cook.
    pub fn set_output_descriptor(&self, param: &str, desc: TextureDescriptor) -> bool {
        match self.state.lock().outputs.get_mut(param) {
            Some(slot) => {
                slot.desc = desc;
                true
            }
            None => false,
        }
    }

    /// Bytes the last cook read from an input parameter.
    pub fn last_input(&self, param: &str) -> Option<Vec<u8>> {
        self.state.lock().last_inputs.get(param).cloned()
    }

    /// Make every transfer query fail with `code` (`None` restores normal operation).
    pub fn fail_transfers(&self, code: Option<i32>) {
        self.state.lock().failure = code;
    }

    pub fn ownership(&self, texture: &CookTexture) -> Option<OwnershipState> {
        self.state.lock().transfers.get(&texture.id()).map(|slot| slot.state)
    }

    /// Run one cook.
    pub fn cook(&self, frame: FrameData) -> Result<CookReport> {
        let mut events = PendingEvents::new();
        let result = {
            let mut state = self.state.lock();
            self.cook_locked(&mut state, frame, &mut events)
        };
        fire(events);
        result
    }

    fn cook_locked(
        &self,
        state: &mut LoopbackState,
        frame: FrameData,
        events: &mut PendingEvents,
    ) -> Result<CookReport> {
        let backend = state
            .context
            .map(|(backend, _)| backend)
            .ok_or_else(|| BridgeError::Gpu("Loopback cooked before create_context".into()))?;
        let mut report = CookReport {
            frame,
            ..Default::default()
        };

        let inputs: Vec<(String, CookTexture)> = state
            .inputs
            .iter()
            .map(|(param, texture)| (param.clone(), texture.clone()))
            .collect();
        for (param, texture) in inputs {
            queue_event(state, &texture, TextureEvent::BeginUse, events);
            let view = self.view(state, backend, &texture)?;
            if self.acquire(state, backend, &texture, &view)? {
                state.last_inputs.insert(param, view.read_pixels());
                let required = state.required_layout;
                self.release(state, backend, &texture, &view, required)?;
                report.inputs_read += 1;
            } else {
                report.inputs_skipped += 1;
            }
            queue_event(state, &texture, TextureEvent::EndUse, events);
        }

        let params: Vec<String> = state.outputs.keys().cloned().collect();
        for param in params {
            let texture = self.output_texture(state, &param)?;
            let view = self.view(state, backend, &texture)?;
            if !self.acquire(state, backend, &texture, &view)? {
                tracing::warn!(param = %param, "[Loopback] Output still held by the host, skipping");
                continue;
            }
            if view.tracks_layout() {
                let mut cmd = CommandBuffer::new("loopback-render", self.wait_timeout);
                cmd.transition(&view, ImageLayout::Undefined, ImageLayout::ColorAttachment);
                cmd.submit()?;
            }
            let bytes = match state.outputs.get(&param) {
                Some(slot) => (slot.producer)(frame, &slot.desc),
                None => continue,
            };
            view.write_pixels(&bytes)?;
            self.release(state, backend, &texture, &view, ImageLayout::TransferSrc)?;
            report.outputs_written += 1;
        }

        state.cooks += 1;
        tracing::trace!(frame = frame.frame_id, ?report, "[Loopback] Cooked");
        Ok(report)
    }

    /// The output's current texture, re-created when its descriptor changed.
    fn output_texture(&self, state: &mut LoopbackState, param: &str) -> Result<CookTexture> {
        let backend = state.context.map(|(backend, _)| backend);
        let (desc, current) = match state.outputs.get(param) {
            Some(slot) => (slot.desc, slot.texture.clone()),
            None => {
                return Err(BridgeError::InvalidTexture(format!("Unknown output '{}'", param)));
            }
        };
        if let Some(texture) = current {
            if texture.descriptor().fits(&desc) {
                return Ok(texture);
            }
            self.forget(state, &texture);
            self.device.close_handle(texture.handle());
        }

        let native = self.device.create_shared_texture(
            &desc,
            HandleType::Duplicate,
            backend == Some(RhiBackend::Immediate),
            backend == Some(RhiBackend::Explicit),
        )?;
        let shared = *native
            .shared_descriptor()
            .ok_or_else(|| BridgeError::Gpu("Shared texture without descriptor".into()))?;
        let texture = CookTexture::new(shared);
        state.views.insert(texture.id(), native);
        state.transfers.insert(
            texture.id(),
            TransferSlot {
                state: OwnershipState::CookOwned,
                record: None,
            },
        );
        if let Some(slot) = state.outputs.get_mut(param) {
            slot.texture = Some(texture.clone());
        }
        tracing::debug!(param, handle = %texture.handle(), "[Loopback] Allocated output texture");
        Ok(texture)
    }

    fn view(
        &self,
        state: &mut LoopbackState,
        backend: RhiBackend,
        texture: &CookTexture,
    ) -> Result<Arc<NativeTexture>> {
        if let Some(view) = state.views.get(&texture.id()) {
            return Ok(Arc::clone(view));
        }
        let view = self
            .device
            .open_shared_texture(texture.shared(), backend == RhiBackend::Explicit)?;
        state.views.insert(texture.id(), Arc::clone(&view));
        Ok(view)
    }

    /// Take ownership of `texture`. Returns false when the host never handed it over.
    fn acquire(
        &self,
        state: &mut LoopbackState,
        backend: RhiBackend,
        texture: &CookTexture,
        view: &Arc<NativeTexture>,
    ) -> Result<bool> {
        let slot = state.transfers.entry(texture.id()).or_default();
        let record = slot.record.take();
        if record.is_none() && slot.state != OwnershipState::CookOwned {
            return Ok(false);
        }
        slot.state = slot.state.acquire(Side::Cook)?;

        let sync = state.sync.entry(texture.id()).or_default();
        match (backend, record) {
            (RhiBackend::Immediate, record) => {
                let key = record.map(|r| r.value).unwrap_or(sync.key);
                let mutex = view.keyed_mutex().ok_or_else(|| {
                    BridgeError::TransferFailure("Shared texture has no keyed mutex".into())
                })?;
                mutex.acquire(key, self.wait_timeout)?;
                sync.key = key;
            }
            (_, Some(record)) => {
                let mut cmd = CommandBuffer::new("loopback-acquire", self.wait_timeout);
                if let TransferSync::Semaphore { handle, .. } = record.sync {
                    let semaphore = self.device.import_semaphore(handle)?;
                    cmd.wait_semaphore(&semaphore, record.value);
                }
                if view.tracks_layout() {
                    cmd.transition(view, view.layout(), record.new_layout);
                }
                cmd.submit()?;
            }
            (_, None) => {}
        }
        Ok(true)
    }

    /// Hand `texture` back to the host.
    fn release(
        &self,
        state: &mut LoopbackState,
        backend: RhiBackend,
        texture: &CookTexture,
        view: &Arc<NativeTexture>,
        new_layout: ImageLayout,
    ) -> Result<()> {
        let sync = state.sync.entry(texture.id()).or_default();
        let record = match backend {
            RhiBackend::Immediate => {
                let mutex = view.keyed_mutex().ok_or_else(|| {
                    BridgeError::TransferFailure("Shared texture has no keyed mutex".into())
                })?;
                let key = sync.key + 1;
                mutex.release(key)?;
                sync.key = key;
                TransferRecord {
                    old_layout: view.layout(),
                    new_layout,
                    sync: TransferSync::KeyedMutex,
                    value: key,
                }
            }
            RhiBackend::Queued | RhiBackend::Explicit => {
                let kind = if backend == RhiBackend::Queued {
                    SemaphoreKind::Timeline
                } else {
                    self.semaphore_kind
                };
                let semaphore = match &sync.semaphore {
                    Some(semaphore) if semaphore.kind() == kind => Arc::clone(semaphore),
                    _ => {
                        let semaphore = self.device.create_semaphore(kind, true);
                        sync.semaphore = Some(Arc::clone(&semaphore));
                        semaphore
                    }
                };
                let handle = semaphore.os_handle().ok_or_else(|| {
                    BridgeError::TransferFailure("Loopback semaphore was not exported".into())
                })?;

                let mut cmd = CommandBuffer::new("loopback-release", self.wait_timeout);
                let value = match kind {
                    SemaphoreKind::Timeline => {
                        sync.value = sync.value.max(semaphore.value()) + 1;
                        cmd.signal_semaphore(&semaphore, sync.value);
                        sync.value
                    }
                    SemaphoreKind::Binary => {
                        if !semaphore.is_signaled() {
                            cmd.signal_semaphore(&semaphore, 0);
                        }
                        0
                    }
                };
                cmd.submit()?;
                TransferRecord {
                    old_layout: view.layout(),
                    new_layout,
                    sync: TransferSync::Semaphore { handle, kind },
                    value,
                }
            }
        };

        let slot = state.transfers.entry(texture.id()).or_default();
        slot.state = slot.state.release(Side::Cook)?;
        slot.record = Some(record);
        Ok(())
    }

    /// Drop engine-side state for a texture the engine no longer references.
    fn forget(&self, state: &mut LoopbackState, texture: &CookTexture) {
        state.views.remove(&texture.id());
        state.transfers.remove(&texture.id());
        state.sync.remove(&texture.id());
    }
}

fn queue_event(
    state: &LoopbackState,
    texture: &CookTexture,
    event: TextureEvent,
    events: &mut PendingEvents,
) {
    if let Some(callback) = state.callbacks.get(&texture.id()) {
        events.push((Arc::clone(callback), event));
    }
}

fn fire(events: PendingEvents) {
    for (callback, event) in events {
        callback(event);
    }
}

impl CookInstance for LoopbackInstance {
    fn device_uuid(&self) -> Option<Uuid> {
        self.state.lock().context.map(|(_, uuid)| uuid)
    }

    fn create_context(&self, backend: RhiBackend, device_uuid: Uuid) -> Result<()> {
        if device_uuid != self.device.uuid() {
            return Err(BridgeError::Configuration(format!(
                "Cook context requested on device {} but the instance runs on {}",
                device_uuid,
                self.device.uuid()
            )));
        }
        self.state.lock().context = Some((backend, device_uuid));
        tracing::info!(%backend, device = %device_uuid, "[Loopback] Context created");
        Ok(())
    }

    fn supported_formats(&self, _backend: RhiBackend) -> Vec<PixelFormat> {
        self.formats.clone()
    }

    fn required_layout(&self) -> ImageLayout {
        self.state.lock().required_layout
    }

    fn set_required_layout(&self, layout: ImageLayout) {
        self.state.lock().required_layout = layout;
    }

    fn texture_transfer(&self, texture: &CookTexture) -> TransferStatus {
        let mut state = self.state.lock();
        if let Some(code) = state.failure {
            return TransferStatus::Failed(code);
        }
        let Some(slot) = state.transfers.get_mut(&texture.id()) else {
            return TransferStatus::NoMatchingEntity;
        };
        match slot.record.take() {
            Some(record) => match slot.state.acquire(Side::Host) {
                Ok(next) => {
                    slot.state = next;
                    TransferStatus::Pending(record)
                }
                Err(_) => {
                    slot.record = Some(record);
                    TransferStatus::Failed(-1)
                }
            },
            None => TransferStatus::NoMatchingEntity,
        }
    }

    fn has_pending_transfer(&self, texture: &CookTexture) -> bool {
        self.state
            .lock()
            .transfers
            .get(&texture.id())
            .is_some_and(|slot| slot.record.is_some())
    }

    fn add_texture_transfer(&self, texture: &CookTexture, record: TransferRecord) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state.transfers.entry(texture.id()).or_default();
        slot.state = slot.state.release(Side::Host)?;
        slot.record = Some(record);
        Ok(())
    }

    fn set_texture_input(&self, param: &str, texture: Option<CookTexture>) -> Result<()> {
        let mut events = PendingEvents::new();
        {
            let mut state = self.state.lock();
            let previous = match texture {
                Some(texture) => state.inputs.insert(param.to_string(), texture),
                None => state.inputs.remove(param),
            };
            if let Some(previous) = previous {
                let still_bound = state.inputs.values().any(|t| t.id() == previous.id());
                if !still_bound {
                    state.views.remove(&previous.id());
                    queue_event(&state, &previous, TextureEvent::Released, &mut events);
                }
            }
        }
        fire(events);
        Ok(())
    }

    fn texture_output(&self, param: &str) -> Option<CookTexture> {
        self.state
            .lock()
            .outputs
            .get(param)
            .and_then(|slot| slot.texture.clone())
    }

    fn set_texture_callback(&self, texture: &CookTexture, callback: TextureCallback) {
        self.state.lock().callbacks.insert(texture.id(), callback);
    }

    fn clear_texture_callback(&self, texture: &CookTexture) {
        let mut state = self.state.lock();
        state.callbacks.remove(&texture.id());
        if !state.inputs.values().any(|t| t.id() == texture.id()) {
            self.forget(&mut state, texture);
        }
    }
}

impl Drop for LoopbackInstance {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for slot in state.outputs.values_mut() {
            if let Some(texture) = slot.texture.take() {
                self.device.close_handle(texture.handle());
            }
        }
    }
}

impl std::fmt::Debug for LoopbackInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoopbackInstance")
            .field("context", &state.context)
            .field("inputs", &state.inputs.len())
            .field("outputs", &state.outputs.len())
            .field("cooks", &state.cooks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn instance(backend: RhiBackend) -> (GpuDevice, LoopbackInstance) {
        let device = GpuDevice::new();
        let instance = LoopbackInstance::new(device.clone());
        instance.create_context(backend, device.uuid()).unwrap();
        (device, instance)
    }

    #[test]
    fn test_context_requires_matching_device() {
        let instance = LoopbackInstance::new(GpuDevice::new());
        let other = GpuDevice::new();
        assert!(instance.create_context(RhiBackend::Explicit, other.uuid()).is_err());
        assert!(instance.device_uuid().is_none());
    }

    #[test]
    fn test_output_published_with_transfer() {
        let (_device, instance) = instance(RhiBackend::Queued);
        let desc = TextureDescriptor::new(2, 1, PixelFormat::R8Unorm);
        instance.add_output("out", desc, Box::new(|frame, _| vec![frame.frame_id as u8; 2]));

        let report = instance.cook(FrameData::new(3)).unwrap();
        assert_eq!(report.outputs_written, 1);

        let texture = instance.texture_output("out").unwrap();
        assert!(instance.has_pending_transfer(&texture));
        let TransferStatus::Pending(record) = instance.texture_transfer(&texture) else {
            panic!("expected a pending transfer");
        };
        assert_eq!(record.semaphore_kind(), Some(SemaphoreKind::Timeline));
        assert_eq!(record.value, 1);
        assert_eq!(instance.ownership(&texture), Some(OwnershipState::HostOwned));
        assert_eq!(instance.texture_transfer(&texture), TransferStatus::NoMatchingEntity);
    }

    #[test]
    fn test_unhanded_input_is_skipped() {
        let (device, instance) = instance(RhiBackend::Explicit);
        let native = device
            .create_shared_texture(
                &TextureDescriptor::new(1, 1, PixelFormat::R8Unorm),
                HandleType::Duplicate,
                false,
                true,
            )
            .unwrap();
        let texture = CookTexture::new(*native.shared_descriptor().unwrap());
        instance.set_texture_input("in", Some(texture)).unwrap();

        let report = instance.cook(FrameData::new(1)).unwrap();
        assert_eq!(report.inputs_skipped, 1);
        assert!(instance.last_input("in").is_none());
    }

    #[test]
    fn test_replacing_input_fires_released() {
        let (device, instance) = instance(RhiBackend::Explicit);
        let desc = TextureDescriptor::new(1, 1, PixelFormat::R8Unorm);
        let native = device
            .create_shared_texture(&desc, HandleType::Duplicate, false, true)
            .unwrap();
        let texture = CookTexture::new(*native.shared_descriptor().unwrap());

        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        instance.set_texture_callback(
            &texture,
            Arc::new(move |event| {
                if event == TextureEvent::Released {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        instance.set_texture_input("a", Some(texture.clone())).unwrap();
        instance.set_texture_input("b", Some(texture)).unwrap();
        instance.set_texture_input("a", None).unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 0);
        instance.set_texture_input("b", None).unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transfer_failure_injection() {
        let (_device, instance) = instance(RhiBackend::Queued);
        instance.add_output(
            "out",
            TextureDescriptor::new(1, 1, PixelFormat::R8Unorm),
            Box::new(|_, _| vec![0]),
        );
        instance.cook(FrameData::new(1)).unwrap();
        let texture = instance.texture_output("out").unwrap();
        instance.fail_transfers(Some(-7));
        assert_eq!(instance.texture_transfer(&texture), TransferStatus::Failed(-7));
        instance.fail_transfers(None);
        assert!(matches!(instance.texture_transfer(&texture), TransferStatus::Pending(_)));
    }
}
