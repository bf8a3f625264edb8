// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! RHI backend selection with runtime resolution.
//!
//! The backend can be selected at runtime via:
//! 1. Explicit parameter passed to `RhiBackend::resolve()`
//! 2. `TEXBRIDGE_RHI_BACKEND` environment variable
//! 3. The `backend` key of `texbridge.yaml`
//! 4. Platform default (explicit)

use std::str::FromStr;

/// Synchronization flavor of the host's active graphics backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RhiBackend {
    /// Legacy immediate-mode API: keyed mutexes, CPU-side waits.
    Immediate,
    /// Command-queue API: shared timeline fences waited on the queue.
    Queued,
    /// Low-level explicit API: image layouts plus binary or timeline semaphores.
    Explicit,
}

impl RhiBackend {
    /// Environment variable name for backend override.
    pub const ENV_VAR: &'static str = "TEXBRIDGE_RHI_BACKEND";

    pub const ALL: [RhiBackend; 3] = [Self::Immediate, Self::Queued, Self::Explicit];

    /// Resolve the backend to use.
    ///
    /// Unparseable environment or config values are logged and skipped.
    pub fn resolve(explicit: Option<Self>, configured: Option<&str>) -> Self {
        if let Some(backend) = explicit {
            return backend;
        }

        if let Ok(env_value) = std::env::var(Self::ENV_VAR) {
            match env_value.parse() {
                Ok(backend) => return backend,
                Err(e) => tracing::warn!("Ignoring {}: {}", Self::ENV_VAR, e),
            }
        }

        if let Some(value) = configured {
            match value.parse() {
                Ok(backend) => return backend,
                Err(e) => tracing::warn!("Ignoring configured backend: {}", e),
            }
        }

        Self::platform_default()
    }

    /// Get the platform default backend.
    pub fn platform_default() -> Self {
        Self::Explicit
    }

    /// Whether waits on the other engine block the CPU rather than the queue.
    pub fn waits_on_cpu(&self) -> bool {
        matches!(self, Self::Immediate)
    }

    /// Get the backend name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Queued => "queued",
            Self::Explicit => "explicit",
        }
    }
}

impl FromStr for RhiBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "immediate" | "legacy" | "d3d11" => Ok(Self::Immediate),
            "queued" | "d3d12" => Ok(Self::Queued),
            "explicit" | "vulkan" => Ok(Self::Explicit),
            _ => Err(format!(
                "Unknown backend '{}'. Valid values: immediate, queued, explicit",
                s
            )),
        }
    }
}

impl std::fmt::Display for RhiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
