// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod bridge;
pub mod config;
pub mod cook;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod future;
pub mod logging;
pub mod provider;
pub mod rhi;
pub mod suspender;

pub use bridge::{BridgeStats, TextureBridge};
pub use config::{BridgeConfig, ConfiguredHandleType};
pub use error::*;
pub use frame::FrameData;
pub use future::{promise, ExchangeFuture, ExecutionContext, Promise};
pub use logging::init_tracing;
pub use suspender::{SuspendOutcome, TaskSuspender, TaskToken};
