// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Cook engine → host texture import.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::cook::{CookInstance, CookTexture};
use crate::core::frame::FrameData;
use crate::core::future::{promise, ExchangeFuture, Promise};
use crate::core::provider::{CopyDirection, ResourceProvider, SyncState, TransferJob};
use crate::core::rhi::{HostTexture, NativeTexture, RenderQueue};
use crate::core::suspender::{TaskSuspender, TaskToken};
use crate::core::{BridgeError, Result};

use super::link::{LinkCompletion, ParameterLinks};
use super::{hand_back, ImportPool, ImportedTexture};

#[derive(Debug, Clone)]
pub struct ImportParams {
    pub param: String,
    pub frame: FrameData,
}

impl ImportParams {
    pub fn new(param: impl Into<String>, frame: FrameData) -> Self {
        Self {
            param: param.into(),
            frame,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportOutput {
    pub param: String,
    /// Host texture holding the output, `None` if the cook engine has not
    /// published one yet.
    pub texture: Option<HostTexture>,
    /// The destination came from the pool instead of a fresh allocation.
    pub reused: bool,
    pub copied: bool,
}

/// Everything the render-queue stage of an import needs.
struct Prepared {
    view: Arc<NativeTexture>,
    sync: Arc<SyncState>,
    destination: HostTexture,
    target: Arc<NativeTexture>,
    reused: bool,
}

struct ImportRequest {
    params: ImportParams,
    source: CookTexture,
    promise: Promise<ImportOutput>,
    _token: TaskToken,
}

pub struct TextureImporter {
    shared: Arc<ImporterShared>,
}

struct ImporterShared {
    provider: Arc<dyn ResourceProvider>,
    instance: Arc<dyn CookInstance>,
    queue: Arc<RenderQueue>,
    pool: Arc<ImportPool>,
    links: ParameterLinks,
    imported: Mutex<HashMap<String, Arc<ImportedTexture>>>,
    suspender: TaskSuspender,
}

impl TextureImporter {
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        instance: Arc<dyn CookInstance>,
        queue: Arc<RenderQueue>,
        pool: Arc<ImportPool>,
        suspender: TaskSuspender,
    ) -> Self {
        Self {
            shared: Arc::new(ImporterShared {
                provider,
                instance,
                queue,
                pool,
                links: ParameterLinks::new(),
                imported: Mutex::new(HashMap::new()),
                suspender,
            }),
        }
    }

    pub fn import(&self, params: ImportParams) -> ExchangeFuture<ImportOutput> {
        let Some(token) = self.shared.suspender.start_task() else {
            tracing::debug!(param = %params.param, "[TextureImporter] Import requested while suspended");
            return ExchangeFuture::ready(Err(BridgeError::Cancelled));
        };

        // Metadata only; no synchronization needed.
        let Some(source) = self.shared.instance.texture_output(&params.param) else {
            return ExchangeFuture::ready(Ok(ImportOutput {
                param: params.param,
                texture: None,
                reused: false,
                copied: false,
            }));
        };
        let format = source.format();
        if !self.shared.provider.is_importable(format) {
            let error = BridgeError::UnsupportedFormat {
                format,
                backend: self.shared.provider.backend().as_str(),
            };
            tracing::warn!(param = %params.param, frame = %params.frame, "[TextureImporter] Import rejected: {}", error);
            return ExchangeFuture::ready(Err(error));
        }

        let (promise, future) = promise();
        let param = params.param.clone();
        let request = ImportRequest {
            params,
            source,
            promise,
            _token: token,
        };
        let shared = Arc::clone(&self.shared);
        self.shared
            .links
            .submit(&param, Box::new(move |completion| shared.run(request, completion)));
        future
    }

    /// Drop imports queued behind in-flight ones.
    pub fn cancel_queued(&self) -> usize {
        self.shared.links.cancel_queued()
    }

    pub fn pool(&self) -> &Arc<ImportPool> {
        &self.shared.pool
    }

    /// Forget the cook engine textures opened so far.
    pub fn clear_sources(&self) {
        self.shared.imported.lock().clear();
    }
}

impl ImporterShared {
    fn imported_for(&self, param: &str) -> Arc<ImportedTexture> {
        let mut imported = self.imported.lock();
        let entry = imported.entry(param.to_string()).or_insert_with(|| {
            Arc::new(ImportedTexture::new(param, Arc::clone(self.provider.semaphores())))
        });
        Arc::clone(entry)
    }

    fn run(&self, request: ImportRequest, completion: LinkCompletion) {
        let param = request.params.param.clone();
        let frame = request.params.frame;

        let Prepared {
            view,
            sync,
            destination,
            target,
            reused,
        } = match self.prepare(&request) {
            Ok(prepared) => prepared,
            Err(e) => {
                log_failure(&param, frame, &e);
                request.promise.reject(e);
                return;
            }
        };

        // Settles the destination once the copy is submitted or abandoned.
        let (eligible, eligibility) = promise::<()>();
        {
            let pool = Arc::clone(&self.pool);
            let param = param.clone();
            let destination = destination.clone();
            eligibility.on_complete(move |result| pool.settle(&param, &destination, frame, result.is_ok()));
        }

        let provider = Arc::clone(&self.provider);
        let instance = Arc::clone(&self.instance);
        let queued = self.queue.enqueue("import-texture", move || {
            // Keeps the task token alive until submission.
            let request = request;
            let result = copy_from_cook(
                provider.as_ref(),
                instance.as_ref(),
                &request.source,
                &view,
                &target,
                &sync,
                &param,
            );
            match result {
                Ok(()) => {
                    eligible.fulfill(());
                    request.promise.fulfill(ImportOutput {
                        param,
                        texture: Some(destination),
                        reused,
                        copied: true,
                    });
                }
                Err(e) => {
                    drop(eligible);
                    log_failure(&param, frame, &e);
                    request.promise.reject(e);
                }
            }
            drop(completion);
        });
        if queued.is_err() {
            tracing::debug!("[TextureImporter] Render queue closed, import cancelled");
        }
    }

    fn prepare(&self, request: &ImportRequest) -> Result<Prepared> {
        let param = &request.params.param;
        let imported = self.imported_for(param);
        let (view, sync) = imported.bind(self.provider.as_ref(), &request.source)?;

        let desc = *request.source.descriptor();
        let (destination, reused) =
            self.pool
                .acquire(self.provider.as_ref(), param, &desc, request.params.frame)?;
        let target = match destination.resource() {
            Some(resource) if resource.is_valid() => resource,
            _ => {
                return Err(BridgeError::InvalidTexture(format!(
                    "Import destination '{}' is not allocated",
                    destination.label()
                )));
            }
        };
        Ok(Prepared {
            view,
            sync,
            destination,
            target,
            reused,
        })
    }
}

/// Handshake and copy. Runs on the render queue.
fn copy_from_cook(
    provider: &dyn ResourceProvider,
    instance: &dyn CookInstance,
    source: &CookTexture,
    view: &Arc<NativeTexture>,
    target: &Arc<NativeTexture>,
    sync: &SyncState,
    param: &str,
) -> Result<()> {
    let incoming = instance.texture_transfer(source).into_record()?;
    let copied = provider.transfer_copy(TransferJob {
        direction: CopyDirection::FromCook,
        host: target,
        shared: view,
        incoming,
        sync,
        label: param,
    });
    match copied {
        Ok(record) => instance.add_texture_transfer(source, record),
        Err(e) => {
            if let Some(incoming) = incoming {
                hand_back(instance, source, incoming, param);
            }
            Err(e)
        }
    }
}

fn log_failure(param: &str, frame: FrameData, error: &BridgeError) {
    if error.is_cancelled() {
        tracing::debug!(param, %frame, "[TextureImporter] Import cancelled");
    } else {
        tracing::error!(param, %frame, "[TextureImporter] Import failed: {}", error);
    }
}

impl std::fmt::Debug for TextureImporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureImporter")
            .field("backend", &self.shared.provider.backend())
            .field("pool", &self.shared.pool)
            .field("links", &self.shared.links)
            .finish()
    }
}
