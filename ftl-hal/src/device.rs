// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Device driver and device handle contracts.
//!
//! These traits describe the capture/playback card the way the transfer
//! engine consumes it: a driver that enumerates and opens devices, and a
//! handle exposing format programming, continuous-transfer control and the
//! free-running audio sample counter. Production builds implement them over
//! the vendor SDK; the [`crate::sim`] module provides a software
//! implementation for development and tests.

use std::sync::Arc;

use crate::{
    AudioConfig, EncoderHandle, HalResult, PixelFormat, RouteTopology, TimecodeWords, VideoMode,
};

/// Read-only description of one physical device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Identifier string accepted by [`DeviceDriver::open`].
    pub specifier: String,
    /// Human-readable product name.
    pub display_name: String,
    /// Number of input/output channels the device exposes.
    pub channels: usize,
    /// Whether the device carries a hardware HEVC codec.
    pub has_encoder: bool,
}

/// Snapshot of the continuous-transfer state for one channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransferStatus {
    /// Number of captured frames buffered on the device, including the frame
    /// currently being written by the capture hardware.
    pub frames_ready: u32,
    /// Whether the continuous transfer is running.
    pub running: bool,
}

/// Result of one frame transfer from the device.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransferInfo {
    /// Bytes of interleaved audio written for this frame interval.
    pub audio_bytes: usize,
    /// Timecode captured with the frame, if the source carried one.
    pub timecode: Option<TimecodeWords>,
}

/// Entry point for locating and opening devices.
pub trait DeviceDriver: Send + Sync {
    /// Lists the devices this driver can open.
    fn enumerate(&self) -> Vec<DeviceInfo>;

    /// Opens the device matching `specifier`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HalError::NotFound`] if no device matches.
    fn open(&self, specifier: &str) -> HalResult<Arc<dyn DeviceHandle>>;
}

/// An open device.
///
/// Configuration calls are fire-and-forget: they either take effect
/// synchronously or fail, no completion is signaled back. The handle is
/// shared across the engine's worker threads, so implementations must be
/// internally synchronized.
pub trait DeviceHandle: Send + Sync {
    /// Returns the device description this handle was opened from.
    fn info(&self) -> DeviceInfo;

    /// Programs the frame buffer raster and pixel layout for a channel.
    fn configure_video(&self, channel: usize, mode: VideoMode, format: PixelFormat)
    -> HalResult<()>;

    /// Routes the signal path for a channel.
    fn route_signal(&self, channel: usize, topology: RouteTopology) -> HalResult<()>;

    /// Binds an audio system to a channel for embedded audio capture.
    fn bind_audio_system(&self, channel: usize, config: &AudioConfig) -> HalResult<()>;

    /// Starts the continuous transfer on a channel.
    fn start_transfer(&self, channel: usize) -> HalResult<()>;

    /// Stops the continuous transfer on a channel.
    fn stop_transfer(&self, channel: usize) -> HalResult<()>;

    /// Queries buffered-frame depth and running state for a channel.
    fn transfer_status(&self, channel: usize) -> HalResult<TransferStatus>;

    /// Transfers the oldest buffered frame into `video` and its audio into
    /// `audio`, in one call.
    ///
    /// The device reuses its own buffer for the next capture as soon as this
    /// returns, so the destination slices must be caller-owned memory.
    fn transfer_frame(
        &self,
        channel: usize,
        video: &mut [u8],
        audio: &mut [u8],
    ) -> HalResult<TransferInfo>;

    /// Blocks until the next vertical interrupt on a channel.
    ///
    /// This is the only synchronization primitive against the device's own
    /// frame clock; implementations bound the wait so callers can observe
    /// shutdown promptly.
    fn wait_vertical_interrupt(&self, channel: usize);

    /// Reads the free-running audio sample counter for a channel.
    ///
    /// The counter advances with the device's audio clock regardless of any
    /// transfer activity and may fail transiently.
    fn audio_sample_count(&self, channel: usize) -> HalResult<u64>;

    /// Returns the hardware codec, if the device carries one.
    fn encoder(&self) -> Option<Arc<dyn EncoderHandle>>;
}
