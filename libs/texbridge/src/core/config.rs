// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bridge configuration via `texbridge.yaml`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::core::provider::ProviderSettings;
use crate::core::rhi::{GpuDevice, HandleType, RhiBackend};
use crate::core::{BridgeError, Result};

/// Handle type used for newly exported shared textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfiguredHandleType {
    #[default]
    Duplicate,
    SameProcess,
}

impl From<ConfiguredHandleType> for HandleType {
    fn from(value: ConfiguredHandleType) -> Self {
        match value {
            ConfiguredHandleType::Duplicate => HandleType::Duplicate,
            ConfiguredHandleType::SameProcess => HandleType::SameProcess,
        }
    }
}

/// Texture bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Backend name (`immediate`, `queued`, `explicit` or an alias).
    /// Overridden by `TEXBRIDGE_RHI_BACKEND`.
    pub backend: Option<String>,

    /// Idle exported textures kept for reuse.
    pub export_pool_capacity: usize,

    /// Idle imported host textures kept for reuse.
    pub import_pool_capacity: usize,

    /// Upper bound on any wait for the cook engine to hand a texture back.
    pub transfer_timeout_ms: u64,

    /// Upper bound on draining in-flight work during teardown.
    pub suspend_timeout_ms: u64,

    /// Software device memory budget. `None` is unbounded.
    pub memory_budget_bytes: Option<u64>,

    /// Ticks an exported texture still used by the cook engine stays out of
    /// the idle pool.
    pub keep_alive_ticks: u32,

    pub handle_type: ConfiguredHandleType,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend: None,
            export_pool_capacity: 20,
            import_pool_capacity: 20,
            transfer_timeout_ms: 5000,
            suspend_timeout_ms: 10_000,
            memory_budget_bytes: None,
            keep_alive_ticks: 1,
            handle_type: ConfiguredHandleType::Duplicate,
        }
    }
}

impl BridgeConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "texbridge.yaml";

    /// Load configuration from a directory. Returns error if the file is
    /// missing, cannot be parsed, or holds invalid values.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            BridgeError::Configuration(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            BridgeError::Configuration(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
        config.validate()?;

        tracing::info!("Loaded bridge config from {}", config_path.display());
        Ok(config)
    }

    /// Load configuration from a directory, returning defaults if the file is
    /// missing or unusable.
    pub fn load_or_default(dir: &Path) -> Self {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            tracing::debug!(
                "No {} found in {}, using defaults",
                Self::FILE_NAME,
                dir.display()
            );
            return Self::default();
        }

        match Self::load(dir) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer_timeout_ms == 0 {
            return Err(BridgeError::Configuration(
                "transfer_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.suspend_timeout_ms == 0 {
            return Err(BridgeError::Configuration(
                "suspend_timeout_ms must be greater than zero".into(),
            ));
        }
        if let Some(name) = &self.backend {
            name.parse::<RhiBackend>()
                .map_err(|e| BridgeError::Configuration(format!("backend: {}", e)))?;
        }
        Ok(())
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn suspend_timeout(&self) -> Duration {
        Duration::from_millis(self.suspend_timeout_ms)
    }

    /// Backend for this configuration, honoring the environment override.
    pub fn resolve_backend(&self) -> RhiBackend {
        RhiBackend::resolve(None, self.backend.as_deref())
    }

    /// Software device honoring `memory_budget_bytes`.
    pub fn create_device(&self) -> GpuDevice {
        match self.memory_budget_bytes {
            Some(bytes) => GpuDevice::with_memory_budget(bytes),
            None => GpuDevice::new(),
        }
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            handle_type: self.handle_type.into(),
            wait_timeout: self.transfer_timeout(),
            semaphore_pool_capacity: self.export_pool_capacity,
            ..ProviderSettings::default()
        }
    }
}
