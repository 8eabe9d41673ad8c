// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration.

use serde::{Deserialize, Serialize};

use ftl_hal::{AudioConfig, PixelFormat, RouteTopology, VideoMode};

/// Default depth of the raw video ring, in frames.
pub const DEFAULT_VIDEO_RING_DEPTH: usize = 8;

/// The audio ring is sized at this multiple of the video ring to tolerate
/// relative rate mismatch between the two paths.
pub const AUDIO_RING_FACTOR: usize = 3;

/// Default number of slots in each output pool. Deliberately larger than the
/// concurrent pipeline depth so downstream consumers can hold frames longer
/// than one ring cycle.
pub const DEFAULT_POOL_SLOTS: usize = 32;

/// Capture configuration passed to [`crate::TransferEngine::init`].
///
/// # Examples
///
/// ```
/// use ftl::EngineConfig;
/// use ftl::hal::{PixelFormat, VideoMode};
///
/// let config = EngineConfig {
///     video_mode: VideoMode::Hd720p5994,
///     pixel_format: PixelFormat::Yuv422_8,
///     ..EngineConfig::default()
/// };
/// assert!(!config.hardware_encode);
/// ```
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EngineConfig {
    /// Input channel to capture from.
    #[serde(default)]
    pub channel: usize,

    /// Raster and frame rate.
    pub video_mode: VideoMode,

    /// Frame buffer pixel layout (also selects the bit depth).
    pub pixel_format: PixelFormat,

    /// Signal routing between connectors and frame stores.
    #[serde(default = "default_routing")]
    pub routing: RouteTopology,

    /// Embedded audio system binding.
    #[serde(default)]
    pub audio: AudioConfig,

    /// Route frames through the on-board HEVC codec instead of delivering
    /// raw pictures.
    #[serde(default)]
    pub hardware_encode: bool,

    /// Depth of the raw video ring, in frames.
    #[serde(default = "default_video_ring_depth")]
    pub video_ring_depth: usize,

    /// Slots in each output buffer pool.
    #[serde(default = "default_pool_slots")]
    pub pool_slots: usize,
}

fn default_routing() -> RouteTopology {
    RouteTopology::MultiStreamPerChannel
}

fn default_video_ring_depth() -> usize {
    DEFAULT_VIDEO_RING_DEPTH
}

fn default_pool_slots() -> usize {
    DEFAULT_POOL_SLOTS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            video_mode: VideoMode::Hd1080p25,
            pixel_format: PixelFormat::Yuv422_8,
            routing: default_routing(),
            audio: AudioConfig::default(),
            hardware_encode: false,
            video_ring_depth: DEFAULT_VIDEO_RING_DEPTH,
            pool_slots: DEFAULT_POOL_SLOTS,
        }
    }
}

impl EngineConfig {
    /// Depth of the audio ring, derived from the video ring depth.
    pub fn audio_ring_depth(&self) -> usize {
        self.video_ring_depth * AUDIO_RING_FACTOR
    }

    /// Frame buffer size for the configured raster and pixel layout.
    pub fn frame_size(&self) -> usize {
        self.pixel_format.frame_size(self.video_mode)
    }

    /// Upper bound on the audio bytes delivered with one video frame.
    pub fn audio_frame_size(&self) -> usize {
        self.audio.max_frame_bytes(self.video_mode.frame_rate())
    }
}
