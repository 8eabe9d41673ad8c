// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! # FTL - Frame Transfer Layer
//!
//! Capture engine for professional video I/O cards: continuous, glitch-free
//! transfer of video, audio and per-frame metadata from the card's DMA
//! engine to a consuming adapter, with optional hand-off to the on-board
//! HEVC codec, plus the clock machinery that turns the card's free-running
//! timebase into presentable timestamps.
//!
//! ## Key concepts
//!
//! - **Engine**: owns the device handle, rings, pools and worker threads
//!   ([`TransferEngine`]); lifecycle is open / init / run / quit
//! - **Ring**: bounded blocking SPSC queue of reusable frame slots between
//!   two pipeline stages ([`FrameRing`])
//! - **Pool**: reference-counted output buffers handed to consumers outside
//!   the ring discipline ([`BufferPool`], [`PoolBuffer`])
//! - **Hardware clock**: monotonic, restart-tolerant projection of the
//!   card's audio sample counter ([`HardwareClock`])
//! - **Time mapping**: damped linear-regression translation from capture
//!   timestamps to presentation timestamps ([`TimeMapper`])
//! - **Registry**: per-device, per-channel coordination contexts for
//!   adapters sharing one input channel ([`ChannelRegistry`])
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   video ring    ┌───────────┐   copy   ┌──────┐
//! │  input worker  ├────────────────►│ video out ├─────────►│ pool ├─► callback
//! │ (hardware DMA) │                 └───────────┘          └──────┘
//! │                │   audio ring    ┌───────────┐
//! │                ├────────────────►│ audio out │ (drain)
//! └────────────────┘                 └───────────┘
//! ```
//!
//! With hardware encoding, the video path detours through the codec:
//! raw ring → codec-raw → HEVC codec → codec-hevc → encoded ring →
//! hevc-out → pool → callback.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ftl::{EngineConfig, TransferEngine};
//! use ftl::hal::VideoMode;
//! use ftl::hal::sim::SimDriver;
//!
//! # fn main() -> ftl::Result<()> {
//! let mut engine = TransferEngine::new(Arc::new(SimDriver::new()));
//! engine.open("sim-0")?;
//! engine.init(EngineConfig {
//!     video_mode: VideoMode::Hd720p5994,
//!     ..EngineConfig::default()
//! })?;
//! engine.set_video_callback(|frame| {
//!     println!("frame {} ({} bytes)", frame.frame_number, frame.len);
//!     true
//! })?;
//! engine.run()?;
//! // ... later ...
//! engine.quit()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread safety
//!
//! [`TransferEngine`] lifecycle methods take `&mut self` and are meant for
//! one control thread; callbacks run on the engine's worker threads and must
//! not block for long. [`PoolBuffer`] handles may be released from any
//! thread.

mod clock;
mod config;
mod engine;
mod error;
mod frame;
mod pool;
mod registry;
mod ring;
mod timemap;

/// Hardware boundary contracts and the software simulator.
pub use ftl_hal as hal;

pub use clock::HardwareClock;
pub use config::{
    AUDIO_RING_FACTOR, DEFAULT_POOL_SLOTS, DEFAULT_VIDEO_RING_DEPTH, EngineConfig,
};
pub use engine::{
    AudioCallback, DRAIN_TIMEOUT, EngineState, EngineStats, TransferEngine, VideoCallback,
};
pub use error::{Error, Result};
pub use frame::{AudioFrameBuffer, VideoFrameBuffer};
pub use pool::{BufferPool, PoolBuffer};
pub use registry::{
    CHANNELS_PER_DEVICE, ChannelContext, ChannelLease, ChannelRegistry, ChannelShared, MediaKind,
};
pub use ring::{ConsumeSlot, FrameRing, ProduceSlot};
pub use timemap::{
    MAX_DECIMATION_SECONDS, MAX_STEP_PER_FRAME_PERCENT, TIMEMAP_WINDOW, TimeMapper, TimeMapping,
};
