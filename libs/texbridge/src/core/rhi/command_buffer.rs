// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! RHI command buffer abstraction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{BridgeError, Result};

use super::device::{check_copy_compatible, NativeTexture, TextureId};
use super::sync::Semaphore;
use super::ImageLayout;

enum Command {
    Wait {
        semaphore: Arc<Semaphore>,
        value: u64,
    },
    Signal {
        semaphore: Arc<Semaphore>,
        value: u64,
    },
    Transition {
        texture: Arc<NativeTexture>,
        from: ImageLayout,
        to: ImageLayout,
    },
    Copy {
        src: Arc<NativeTexture>,
        dst: Arc<NativeTexture>,
    },
}

/// Single-use command buffer: record, then [`submit`](CommandBuffer::submit).
///
/// Recorded commands hold strong references to every texture and semaphore
/// they touch, so resources outlive the scope that recorded them until the
/// buffer retires.
pub struct CommandBuffer {
    label: String,
    commands: Vec<Command>,
    wait_timeout: Duration,
}

impl CommandBuffer {
    pub fn new(label: impl Into<String>, wait_timeout: Duration) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
            wait_timeout,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Queue-side wait until `semaphore` reaches `value`.
    pub fn wait_semaphore(&mut self, semaphore: &Arc<Semaphore>, value: u64) {
        self.commands.push(Command::Wait {
            semaphore: Arc::clone(semaphore),
            value,
        });
    }

    pub fn signal_semaphore(&mut self, semaphore: &Arc<Semaphore>, value: u64) {
        self.commands.push(Command::Signal {
            semaphore: Arc::clone(semaphore),
            value,
        });
    }

    /// Layout barrier. `from == Undefined` discards the previous contents
    /// and is valid from any layout.
    pub fn transition(&mut self, texture: &Arc<NativeTexture>, from: ImageLayout, to: ImageLayout) {
        self.commands.push(Command::Transition {
            texture: Arc::clone(texture),
            from,
            to,
        });
    }

    pub fn copy_texture(&mut self, src: &Arc<NativeTexture>, dst: &Arc<NativeTexture>) {
        self.commands.push(Command::Copy {
            src: Arc::clone(src),
            dst: Arc::clone(dst),
        });
    }

    /// Check the whole buffer against the current resource state without
    /// executing anything.
    fn validate(&self) -> Result<()> {
        let mut layouts: HashMap<TextureId, ImageLayout> = HashMap::new();

        for command in &self.commands {
            match command {
                Command::Transition { texture, from, to } => {
                    if !texture.is_valid() {
                        return Err(BridgeError::InvalidTexture(format!(
                            "[{}] transition on invalidated texture {:?}",
                            self.label,
                            texture.id()
                        )));
                    }
                    let actual = layout_in(texture, &layouts);
                    if texture.tracks_layout() && *from != ImageLayout::Undefined && actual != *from {
                        return Err(BridgeError::Gpu(format!(
                            "[{}] texture {:?} is in layout {:?}, barrier expected {:?}",
                            self.label,
                            texture.id(),
                            actual,
                            from
                        )));
                    }
                    layouts.insert(texture.id(), *to);
                }
                Command::Copy { src, dst } => {
                    check_copy_compatible(src, dst)?;
                    if src.tracks_layout() && !layout_in(src, &layouts).is_copy_source() {
                        return Err(BridgeError::Gpu(format!(
                            "[{}] copy source {:?} not in a transfer-source layout",
                            self.label,
                            src.id()
                        )));
                    }
                    if dst.tracks_layout() && !layout_in(dst, &layouts).is_copy_destination() {
                        return Err(BridgeError::Gpu(format!(
                            "[{}] copy destination {:?} not in a transfer-destination layout",
                            self.label,
                            dst.id()
                        )));
                    }
                }
                Command::Wait { .. } | Command::Signal { .. } => {}
            }
        }
        Ok(())
    }

    /// Validate, then execute in recording order.
    ///
    /// Validation failures execute nothing. A wait that times out stops
    /// execution before any later command runs.
    pub fn submit(self) -> Result<()> {
        self.validate()?;

        for command in &self.commands {
            match command {
                Command::Wait { semaphore, value } => semaphore.wait(*value, self.wait_timeout)?,
                Command::Signal { semaphore, value } => semaphore.signal(*value)?,
                Command::Transition { texture, to, .. } => texture.set_layout(*to),
                Command::Copy { src, dst } => dst.copy_from(src)?,
            }
        }
        tracing::trace!(label = %self.label, commands = self.commands.len(), "Command buffer retired");
        Ok(())
    }
}

/// Layout a texture will be in at this point of the buffer.
fn layout_in(texture: &NativeTexture, pending: &HashMap<TextureId, ImageLayout>) -> ImageLayout {
    pending
        .get(&texture.id())
        .copied()
        .unwrap_or_else(|| texture.layout())
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("label", &self.label)
            .field("commands", &self.commands.len())
            .finish()
    }
}
