// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

use crate::core::rhi::PixelFormat;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Pixel format {format:?} cannot be exchanged on the {backend} backend")]
    UnsupportedFormat {
        format: PixelFormat,
        backend: &'static str,
    },

    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    #[error("Allocation failed: {0}")]
    AllocationFailure(String),

    #[error("Ownership transfer failed: {0}")]
    TransferFailure(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("GPU operation failed: {0}")]
    Gpu(String),

    #[error("Invalid texture: {0}")]
    InvalidTexture(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    /// Superseded or suspended requests. Not an error condition for callers.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Anything that degrades the parameter for this frame.
    pub fn is_failure(&self) -> bool {
        !self.is_cancelled()
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(BridgeError::Cancelled.is_cancelled());
        assert!(!BridgeError::Cancelled.is_failure());
        assert!(BridgeError::AllocationFailure("oom".into()).is_failure());
        assert!(BridgeError::TransferFailure("timeout".into()).is_failure());
    }

    #[test]
    fn test_unsupported_format_message() {
        let err = BridgeError::UnsupportedFormat {
            format: PixelFormat::Nv12,
            backend: "explicit",
        };
        assert_eq!(
            err.to_string(),
            "Pixel format Nv12 cannot be exchanged on the explicit backend"
        );
    }
}
