// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! # FTL-HAL - hardware boundary for the Frame Transfer Layer
//!
//! Contracts for the professional capture/playback card underneath the FTL
//! transfer engine: device enumeration and opening, format and routing
//! programming, the continuous frame transfer, the free-running audio sample
//! counter, and the hardware HEVC codec's firmware state machine.
//!
//! The engine consumes these as trait objects, so a production build links a
//! vendor-SDK implementation while tests and examples run against the
//! deterministic software device in [`sim`].
//!
//! ## Key concepts
//!
//! - **Driver**: locates devices and opens a [`DeviceHandle`] by specifier
//!   string ([`DeviceDriver`])
//! - **Channel**: one physical input/output path on a device; all handle
//!   operations are per-channel
//! - **Continuous transfer**: the card captures into its own buffers; the
//!   host drains them with [`DeviceHandle::transfer_frame`], pacing itself on
//!   [`DeviceHandle::wait_vertical_interrupt`]
//! - **Codec**: an on-board HEVC encoder with a firmware state machine whose
//!   transitions are confirmed one read at a time ([`EncoderHandle`])
//!
//! ## Thread safety
//!
//! Handles are shared across the engine's worker threads; every trait in this
//! crate is `Send + Sync` and implementations synchronize internally.

mod device;
mod encoder;
mod error;
mod format;

pub mod sim;

pub use device::{DeviceDriver, DeviceHandle, DeviceInfo, TransferInfo, TransferStatus};
pub use encoder::{EhState, EncodedInfo, EncoderHandle, EncoderState, VinState};
pub use error::{HalError, HalResult};
pub use format::{
    AudioConfig, PixelFormat, Rational, RawPictureInfo, RouteTopology, TimecodeWords, VideoMode,
};
