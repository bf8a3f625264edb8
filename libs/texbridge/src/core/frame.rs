// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

/// Identifies one cook cycle. Frame ids increase monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FrameData {
    pub frame_id: u64,
}

impl FrameData {
    pub fn new(frame_id: u64) -> Self {
        Self { frame_id }
    }

    pub fn next(&self) -> Self {
        Self {
            frame_id: self.frame_id + 1,
        }
    }

    /// A resource parked at `self` may be handed to a request at `request`.
    pub fn allows_reuse_at(&self, request: FrameData) -> bool {
        request.frame_id > self.frame_id
    }
}

impl From<u64> for FrameData {
    fn from(frame_id: u64) -> Self {
        Self { frame_id }
    }
}

impl std::fmt::Display for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_requires_later_frame() {
        let pooled = FrameData::new(10);
        assert!(!pooled.allows_reuse_at(FrameData::new(9)));
        assert!(!pooled.allows_reuse_at(FrameData::new(10)));
        assert!(pooled.allows_reuse_at(pooled.next()));
    }
}
