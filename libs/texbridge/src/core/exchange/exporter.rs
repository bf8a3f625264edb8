// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Host → cook engine texture export.
//!
//! Request validation and the cache lookup run on the caller's thread (or on
//! the thread that finished the parameter's previous export). The handshake
//! and copy run on the render queue. The returned future resolves once the
//! copy is submitted.

use std::sync::Arc;

use crate::core::cook::{CookInstance, CookTexture};
use crate::core::frame::FrameData;
use crate::core::future::{promise, ExchangeFuture, Promise};
use crate::core::provider::{CopyDirection, ResourceProvider, TransferJob};
use crate::core::rhi::{HostTexture, NativeTexture, RenderQueue};
use crate::core::suspender::{TaskSuspender, TaskToken};
use crate::core::{BridgeError, Result};

use super::frame_updates::{FrameUpdateTracker, InputUpdate};
use super::link::{LinkCompletion, ParameterLinks};
use super::{hand_back, ExportedTexture, ExportedTextureCache};

/// One texture input update.
#[derive(Debug, Clone)]
pub struct ExportParams {
    pub param: String,
    /// `None` clears the cook engine's input.
    pub texture: Option<HostTexture>,
    pub frame: FrameData,
    /// Copy even when the shared texture already holds this resource.
    pub force_copy: bool,
}

impl ExportParams {
    pub fn new(param: impl Into<String>, texture: Option<HostTexture>, frame: FrameData) -> Self {
        Self {
            param: param.into(),
            texture,
            frame,
            force_copy: false,
        }
    }

    pub fn with_force_copy(mut self, force_copy: bool) -> Self {
        self.force_copy = force_copy;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub param: String,
    /// Texture now bound to the cook engine input, `None` if it was cleared.
    pub texture: Option<CookTexture>,
    pub is_new: bool,
    pub copied: bool,
}

/// State an export carries from request to completion.
struct ExportRequest {
    params: ExportParams,
    promise: Promise<ExportOutput>,
    _token: TaskToken,
    _update: InputUpdate,
}

pub struct TextureExporter {
    shared: Arc<ExporterShared>,
}

struct ExporterShared {
    provider: Arc<dyn ResourceProvider>,
    instance: Arc<dyn CookInstance>,
    queue: Arc<RenderQueue>,
    cache: Arc<ExportedTextureCache>,
    links: ParameterLinks,
    updates: FrameUpdateTracker,
    suspender: TaskSuspender,
}

impl TextureExporter {
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        instance: Arc<dyn CookInstance>,
        queue: Arc<RenderQueue>,
        cache: Arc<ExportedTextureCache>,
        suspender: TaskSuspender,
    ) -> Self {
        Self {
            shared: Arc::new(ExporterShared {
                provider,
                instance,
                queue,
                cache,
                links: ParameterLinks::new(),
                updates: FrameUpdateTracker::new(),
                suspender,
            }),
        }
    }

    pub fn export(&self, params: ExportParams) -> ExchangeFuture<ExportOutput> {
        let Some(token) = self.shared.suspender.start_task() else {
            tracing::debug!(param = %params.param, "[TextureExporter] Export requested while suspended");
            return ExchangeFuture::ready(Err(BridgeError::Cancelled));
        };

        if let Some(texture) = &params.texture {
            if let Err(e) = self.shared.validate(texture) {
                tracing::warn!(param = %params.param, frame = %params.frame, "[TextureExporter] Export rejected: {}", e);
                return ExchangeFuture::ready(Err(e));
            }
        }

        let (promise, future) = promise();
        let param = params.param.clone();
        let request = ExportRequest {
            _update: self.shared.updates.begin_update(params.frame),
            params,
            promise,
            _token: token,
        };
        let shared = Arc::clone(&self.shared);
        self.shared
            .links
            .submit(&param, Box::new(move |completion| shared.run(request, completion)));
        future
    }

    /// Resolves once every input update for `frame` and earlier is terminal.
    pub fn on_updates_finished(&self, frame: FrameData) -> ExchangeFuture<FrameData> {
        self.shared.updates.on_updates_finished(frame)
    }

    /// Drop exports queued behind in-flight ones.
    pub fn cancel_queued(&self) -> usize {
        self.shared.links.cancel_queued()
    }

    pub fn cache(&self) -> &Arc<ExportedTextureCache> {
        &self.shared.cache
    }
}

impl ExporterShared {
    fn validate(&self, texture: &HostTexture) -> Result<()> {
        let format = texture.format().ok_or_else(|| {
            BridgeError::InvalidTexture(format!("Host texture '{}' has no GPU resource", texture.label()))
        })?;
        if !self.provider.is_exportable(format) {
            return Err(BridgeError::UnsupportedFormat {
                format,
                backend: self.provider.backend().as_str(),
            });
        }
        Ok(())
    }

    fn run(&self, request: ExportRequest, completion: LinkCompletion) {
        let param = request.params.param.clone();
        let Some(host) = request.params.texture.clone() else {
            self.cache.unbind_param(&param);
            let result = self.instance.set_texture_input(&param, None).map(|_| ExportOutput {
                param: param.clone(),
                texture: None,
                is_new: false,
                copied: false,
            });
            request.promise.resolve(result);
            return;
        };

        let lookup = match self.cache.get_or_create(&host, &param) {
            Ok(lookup) => lookup,
            Err(e) => {
                log_failure(&param, request.params.frame, &e);
                request.promise.reject(e);
                return;
            }
        };

        if !lookup.needs_copy && !request.params.force_copy {
            lookup.texture.mark_bound();
            let cook_texture = lookup.texture.cook_texture().clone();
            let result = self
                .instance
                .set_texture_input(&param, Some(cook_texture.clone()))
                .map(|_| ExportOutput {
                    param,
                    texture: Some(cook_texture),
                    is_new: false,
                    copied: false,
                });
            request.promise.resolve(result);
            return;
        }

        let Some(source) = host.resource() else {
            request.promise.reject(BridgeError::InvalidTexture(format!(
                "Host texture '{}' lost its GPU resource",
                host.label()
            )));
            return;
        };

        let provider = Arc::clone(&self.provider);
        let instance = Arc::clone(&self.instance);
        let texture = lookup.texture;
        let is_new = lookup.is_new;
        let queued = self.queue.enqueue("export-texture", move || {
            // Keeps the task token and update guard alive until submission.
            let request = request;
            let frame = request.params.frame;
            let result = copy_to_cook(provider.as_ref(), instance.as_ref(), &texture, &source, &param)
                .map(|cook_texture| ExportOutput {
                    param: param.clone(),
                    texture: Some(cook_texture),
                    is_new,
                    copied: true,
                });
            if let Err(e) = &result {
                if e.is_failure() {
                    texture.poison();
                }
                log_failure(&param, frame, e);
            }
            request.promise.resolve(result);
            drop(completion);
        });
        if queued.is_err() {
            tracing::debug!("[TextureExporter] Render queue closed, export cancelled");
        }
    }
}

/// Handshake and copy. Runs on the render queue.
fn copy_to_cook(
    provider: &dyn ResourceProvider,
    instance: &dyn CookInstance,
    texture: &ExportedTexture,
    source: &Arc<NativeTexture>,
    param: &str,
) -> Result<CookTexture> {
    let cook_texture = texture.cook_texture();
    // No matching entity means the cook engine never touched the texture.
    let incoming = instance.texture_transfer(cook_texture).into_record()?;
    let copied = provider.transfer_copy(TransferJob {
        direction: CopyDirection::ToCook,
        host: source,
        shared: texture.shared(),
        incoming,
        sync: texture.sync(),
        label: param,
    });
    let record = match copied {
        Ok(record) => record,
        Err(e) => {
            if let Some(incoming) = incoming {
                hand_back(instance, cook_texture, incoming, param);
            }
            return Err(e);
        }
    };
    instance.add_texture_transfer(cook_texture, record)?;
    texture.mark_bound();
    instance.set_texture_input(param, Some(cook_texture.clone()))?;
    Ok(cook_texture.clone())
}

fn log_failure(param: &str, frame: FrameData, error: &BridgeError) {
    if error.is_cancelled() {
        tracing::debug!(param, %frame, "[TextureExporter] Export cancelled");
    } else {
        tracing::error!(param, %frame, "[TextureExporter] Export failed: {}", error);
    }
}

impl std::fmt::Debug for TextureExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureExporter")
            .field("backend", &self.shared.provider.backend())
            .field("links", &self.shared.links)
            .field("updates", &self.shared.updates)
            .finish()
    }
}
