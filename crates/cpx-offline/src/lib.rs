// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Deterministic offline segmentation strategies.
//!
//! Every detector implements [`cpx_core::OfflineDetector`], returns sorted
//! unique change points, and yields an empty result on a constant signal.

pub mod binseg;
pub(crate) mod common;
pub mod cusum;
pub mod pelt;
pub mod window;

pub use binseg::{BinSeg, BinSegConfig};
pub use cusum::{Cusum, CusumConfig, DEFAULT_CUSUM_THRESHOLD};
pub use pelt::{Pelt, PeltConfig};
pub use window::{SlidingWindow, SlidingWindowConfig};
