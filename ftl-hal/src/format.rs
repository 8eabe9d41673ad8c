// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Static video/audio format descriptions used at the hardware boundary.
//!
//! These types describe what the card can be programmed to do; they carry no
//! behavior beyond size and rate arithmetic.

use serde::{Deserialize, Serialize};

/// Rational number representation for frame and sample rates.
///
/// Used for frame rates (e.g. 60000/1001 for 59.94 fps) and sample rates
/// (e.g. 48000/1 for 48 kHz audio).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rational {
    /// Numerator of the rate.
    pub numerator: u32,
    /// Denominator of the rate (defaults to 1 if omitted).
    #[serde(default = "default_denominator")]
    pub denominator: u32,
}

fn default_denominator() -> u32 {
    1
}

impl Rational {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Duration of one unit at this rate, in nanoseconds (truncated).
    ///
    /// For a frame rate this is the frame interval; 60000/1001 yields
    /// 16_683_333 ns.
    pub fn interval_ns(&self) -> u64 {
        if self.numerator == 0 {
            return 0;
        }
        (1_000_000_000u128 * self.denominator as u128 / self.numerator as u128) as u64
    }

    /// The rate rounded up to a whole number of units per second.
    pub fn per_second_ceil(&self) -> u64 {
        if self.denominator == 0 {
            return 0;
        }
        self.numerator.div_ceil(self.denominator) as u64
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Video raster and frame rate selection.
///
/// A reduced set of the modes the card family supports; enough to cover the
/// progressive and interlaced HD rasters plus UHD quad-link modes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoMode {
    Hd720p50,
    Hd720p5994,
    Hd720p60,
    Hd1080i50,
    Hd1080i5994,
    Hd1080p24,
    Hd1080p25,
    Hd1080p2997,
    Hd1080p30,
    Hd1080p50,
    Hd1080p5994,
    Hd1080p60,
    Uhd2160p25,
    Uhd2160p2997,
    Uhd2160p30,
}

impl VideoMode {
    /// Active picture width in pixels.
    pub fn width(&self) -> u32 {
        match self {
            VideoMode::Hd720p50 | VideoMode::Hd720p5994 | VideoMode::Hd720p60 => 1280,
            VideoMode::Uhd2160p25 | VideoMode::Uhd2160p2997 | VideoMode::Uhd2160p30 => 3840,
            _ => 1920,
        }
    }

    /// Active picture height in pixels (full frame height for interlaced).
    pub fn height(&self) -> u32 {
        match self {
            VideoMode::Hd720p50 | VideoMode::Hd720p5994 | VideoMode::Hd720p60 => 720,
            VideoMode::Uhd2160p25 | VideoMode::Uhd2160p2997 | VideoMode::Uhd2160p30 => 2160,
            _ => 1080,
        }
    }

    /// Nominal frame rate.
    pub fn frame_rate(&self) -> Rational {
        match self {
            VideoMode::Hd720p50 | VideoMode::Hd1080i50 | VideoMode::Hd1080p50 => {
                Rational::new(50, 1)
            }
            VideoMode::Hd720p5994 | VideoMode::Hd1080p5994 => Rational::new(60000, 1001),
            VideoMode::Hd720p60 | VideoMode::Hd1080p60 => Rational::new(60, 1),
            VideoMode::Hd1080i5994 => Rational::new(30000, 1001),
            VideoMode::Hd1080p24 => Rational::new(24, 1),
            VideoMode::Hd1080p25 | VideoMode::Uhd2160p25 => Rational::new(25, 1),
            VideoMode::Hd1080p2997 | VideoMode::Uhd2160p2997 => Rational::new(30000, 1001),
            VideoMode::Hd1080p30 | VideoMode::Uhd2160p30 => Rational::new(30, 1),
        }
    }

    /// Whether the mode carries two fields per frame.
    pub fn is_interlaced(&self) -> bool {
        matches!(self, VideoMode::Hd1080i50 | VideoMode::Hd1080i5994)
    }
}

/// Frame buffer pixel layout.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit 4:2:2 packed (UYVY), 2 bytes per pixel.
    Yuv422_8,
    /// 10-bit 4:2:2 packed (v210), 128 bytes per 48 pixels.
    Yuv422_10,
    /// 8-bit BGRA, 4 bytes per pixel.
    Bgra8,
}

impl PixelFormat {
    /// Bits per component.
    pub fn bit_depth(&self) -> u32 {
        match self {
            PixelFormat::Yuv422_10 => 10,
            _ => 8,
        }
    }

    /// Bytes per row for the given active width.
    pub fn row_bytes(&self, width: u32) -> usize {
        match self {
            PixelFormat::Yuv422_8 => width as usize * 2,
            // v210 packs 48 pixels into 128 bytes, rows padded to that group.
            PixelFormat::Yuv422_10 => width.div_ceil(48) as usize * 128,
            PixelFormat::Bgra8 => width as usize * 4,
        }
    }

    /// Total frame buffer size for the given mode.
    pub fn frame_size(&self, mode: VideoMode) -> usize {
        self.row_bytes(mode.width()) * mode.height() as usize
    }
}

/// Signal routing topology between input connectors and frame stores.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteTopology {
    /// Four physical links carrying one UHD stream into a single frame store.
    QuadSingleStream,
    /// One stream per channel, each channel routed independently.
    MultiStreamPerChannel,
    /// Legacy single-stream routing through the first frame store.
    SingleStreamLegacy,
}

/// Audio system binding for a capture channel.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels the card embeds.
    pub channels: u32,
    /// Bytes per sample per channel.
    pub bytes_per_sample: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 16,
            bytes_per_sample: 4,
        }
    }
}

impl AudioConfig {
    /// Exact sample count accumulated after `frames` video frames.
    ///
    /// Computed from the rational frame rate so per-frame rounding never
    /// accumulates drift (59.94 fps alternates 800- and 801-sample frames).
    pub fn samples_after_frames(&self, frames: u64, frame_rate: Rational) -> u64 {
        if frame_rate.numerator == 0 {
            return 0;
        }
        (frames as u128 * self.sample_rate as u128 * frame_rate.denominator as u128
            / frame_rate.numerator as u128) as u64
    }

    /// Upper bound on the audio byte count delivered with one video frame.
    pub fn max_frame_bytes(&self, frame_rate: Rational) -> usize {
        if frame_rate.numerator == 0 {
            return 0;
        }
        let samples = (self.sample_rate as u128 * frame_rate.denominator as u128)
            .div_ceil(frame_rate.numerator as u128) as usize
            + 1;
        samples * self.channels as usize * self.bytes_per_sample as usize
    }
}

/// Hardware timecode words captured with a frame (RP 188).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimecodeWords {
    /// Distributed binary bits word.
    pub dbb: u32,
    /// Low timecode word.
    pub low: u32,
    /// High timecode word.
    pub high: u32,
}

/// Per-picture metadata handed to the hardware codec with each raw frame.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawPictureInfo {
    /// Monotonic picture serial number.
    pub serial: u64,
    /// Presentation timestamp in 90 kHz units.
    pub pts_90k: u64,
    /// Set on the final picture of a session so the codec flushes.
    pub last_frame: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_interval_5994() {
        let rate = VideoMode::Hd720p5994.frame_rate();
        // 1001/60000 s, truncated to whole nanoseconds.
        assert_eq!(rate.interval_ns(), 16_683_333);
    }

    #[test]
    fn v210_row_padding() {
        // 1280 pixels -> 27 groups of 48 -> 3456 bytes per row.
        assert_eq!(PixelFormat::Yuv422_10.row_bytes(1280), 27 * 128);
        assert_eq!(PixelFormat::Yuv422_8.frame_size(VideoMode::Hd720p60), 1280 * 2 * 720);
    }

    #[test]
    fn audio_samples_do_not_drift() {
        let audio = AudioConfig::default();
        let rate = Rational::new(60000, 1001);
        // One hour of 59.94 video carries exactly one hour of 48 kHz audio.
        let frames_per_hour = 60000 * 3600 / 1001;
        let samples = audio.samples_after_frames(frames_per_hour, rate);
        let expected = frames_per_hour as u128 * 48_000 * 1001 / 60000;
        assert_eq!(samples as u128, expected);
    }
}
