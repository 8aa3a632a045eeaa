// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

/// Receives progress fractions in `[0, 1]` from long-running detectors.
pub trait ProgressSink: Sync {
    fn on_progress(&self, fraction: f32);
}
