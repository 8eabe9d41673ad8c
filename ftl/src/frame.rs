// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Frame buffer types moved through the rings and output pools.
//!
//! Buffers are allocated once, when a ring or pool is built, and reused for
//! the lifetime of the engine; stages transfer ownership of a slot rather
//! than copying payload bytes, except for the single mandatory copy out of
//! the raw ring into an output pool slot (the raw slot is about to be reused
//! for the next hardware transfer).

use ftl_hal::{RawPictureInfo, TimecodeWords};

/// One frame's worth of video (raw pixels or an encoded access unit) plus
/// its per-frame metadata.
#[derive(Debug)]
pub struct VideoFrameBuffer {
    /// Payload storage, sized for the configured raster at construction.
    pub data: Vec<u8>,
    /// Valid bytes in `data`; encoded access units vary in length.
    pub len: usize,
    /// Sequence number stamped by the producing stage.
    pub frame_number: u64,
    /// Hardware timecode captured with the frame, if any.
    pub timecode: Option<TimecodeWords>,
    /// Picture metadata for the hardware codec path.
    pub picture_info: Option<RawPictureInfo>,
    /// Marks the final frame of an orderly shutdown.
    pub last_frame: bool,
    /// Capture timestamp in hardware clock units (nanoseconds).
    pub capture_time: u64,
    /// Estimated frame duration in nanoseconds.
    pub duration: u64,
}

impl VideoFrameBuffer {
    /// A buffer with `capacity` bytes of payload storage.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            len: 0,
            frame_number: 0,
            timecode: None,
            picture_info: None,
            last_frame: false,
            capture_time: 0,
            duration: 0,
        }
    }

    /// The valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// One frame interval's worth of interleaved PCM audio.
#[derive(Debug)]
pub struct AudioFrameBuffer {
    /// Payload storage, sized for the worst-case per-frame byte count.
    pub data: Vec<u8>,
    /// Valid bytes in `data`; per-frame sample counts vary at fractional
    /// frame rates.
    pub len: usize,
    /// Marks the final frame of an orderly shutdown.
    pub last_frame: bool,
}

impl AudioFrameBuffer {
    /// A buffer with `capacity` bytes of payload storage.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            len: 0,
            last_frame: false,
        }
    }

    /// The valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }
}
