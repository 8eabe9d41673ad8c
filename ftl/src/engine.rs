// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Device transfer engine.
//!
//! Owns the device handle, the stage rings, the output pools and the worker
//! threads that move frames from the hardware transfer into a consumer's
//! hands. The lifecycle is linear:
//!
//! ```text
//! Uninitialized -open-> Opened -init-> Initialized -run-> Running -quit-> Stopped
//! ```
//!
//! `open` binds a physical device, `init` programs formats and builds the
//! pipeline (re-invocable from `Opened` after a failure), `run` spawns the
//! worker set for the configured mode, and `quit` performs a cooperative,
//! drain-before-stop shutdown: a last-frame marker is pushed through every
//! ring so no stage is stopped while holding a frame another stage still
//! expects, with a bounded wait that logs and proceeds on timeout.
//!
//! Two worker topologies exist. Raw passthrough:
//!
//! ```text
//! input -> video ring -> video-out -> pool -> callback
//!       -> audio ring -> audio-out
//! ```
//!
//! Hardware encode:
//!
//! ```text
//! input -> video ring -> codec-raw -> [HEVC codec] -> codec-hevc
//!        -> encoded ring -> hevc-out -> pool -> callback
//!       -> audio ring -> audio-out
//! ```

mod encoder;
mod workers;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use ftl_hal::{DeviceDriver, DeviceHandle, DeviceInfo, EncoderHandle, HalError, RouteTopology};

use crate::clock::HardwareClock;
use crate::config::EngineConfig;
use crate::frame::{AudioFrameBuffer, VideoFrameBuffer};
use crate::pool::{BufferPool, PoolBuffer};
use crate::ring::FrameRing;
use crate::{Error, Result};

/// Bound on the wait for the last-frame marker to drain through every stage.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) const STAGE_INPUT: u32 = 1 << 0;
pub(crate) const STAGE_VIDEO_OUT: u32 = 1 << 1;
pub(crate) const STAGE_CODEC_RAW: u32 = 1 << 2;
pub(crate) const STAGE_CODEC_HEVC: u32 = 1 << 3;
pub(crate) const STAGE_HEVC_OUT: u32 = 1 << 4;
pub(crate) const STAGE_AUDIO_OUT: u32 = 1 << 5;

/// Lifecycle state of a [`TransferEngine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Opened,
    Initialized,
    Running,
    Quitting,
    Stopped,
}

/// Video delivery callback. Invoked from a worker thread with an owned pool
/// buffer; must not block for long. Return `true` if the buffer was
/// consumed; dropping the handle (on either return value) releases the slot.
pub type VideoCallback = Arc<dyn Fn(PoolBuffer<VideoFrameBuffer>) -> bool + Send + Sync>;

/// Audio delivery callback, same contract as [`VideoCallback`].
pub type AudioCallback = Arc<dyn Fn(PoolBuffer<AudioFrameBuffer>) -> bool + Send + Sync>;

#[derive(Default)]
pub(crate) struct Callbacks {
    pub(crate) video: Mutex<Option<VideoCallback>>,
    pub(crate) audio: Mutex<Option<AudioCallback>>,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) frames_captured: AtomicU64,
    pub(crate) video_delivered: AtomicU64,
    pub(crate) video_dropped: AtomicU64,
    pub(crate) callbacks_declined: AtomicU64,
    pub(crate) encoded_delivered: AtomicU64,
    pub(crate) audio_drained: AtomicU64,
}

/// Snapshot of the engine's delivery counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineStats {
    /// Frames pulled from the hardware transfer.
    pub frames_captured: u64,
    /// Raw frames handed to the video callback and consumed.
    pub video_delivered: u64,
    /// Frames dropped because no output pool slot was free.
    pub video_dropped: u64,
    /// Callback invocations that declined the buffer.
    pub callbacks_declined: u64,
    /// Encoded access units handed to the video callback and consumed.
    pub encoded_delivered: u64,
    /// Audio frames drained from the audio ring.
    pub audio_drained: u64,
    /// Every active stage has observed the last-frame marker.
    pub drained: bool,
}

/// Tracks which stages have seen the last-frame marker pass through.
pub(crate) struct DrainTracker {
    state: Mutex<u32>,
    cv: Condvar,
}

impl DrainTracker {
    fn new() -> Self {
        Self {
            state: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn mark(&self, stage: u32) {
        let mut state = self.state.lock().unwrap();
        *state |= stage;
        self.cv.notify_all();
    }

    pub(crate) fn is_marked(&self, stage: u32) -> bool {
        *self.state.lock().unwrap() & stage == stage
    }

    fn marked(&self) -> u32 {
        *self.state.lock().unwrap()
    }

    fn wait_all(&self, mask: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        while *state & mask != mask {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cv.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
        true
    }
}

/// Everything the worker threads share.
pub(crate) struct Pipeline {
    pub(crate) device: Arc<dyn DeviceHandle>,
    pub(crate) encoder: Option<Arc<dyn EncoderHandle>>,
    pub(crate) config: EngineConfig,
    pub(crate) frame_duration: u64,
    pub(crate) video_ring: FrameRing<VideoFrameBuffer>,
    pub(crate) audio_ring: FrameRing<AudioFrameBuffer>,
    pub(crate) encoded_ring: Option<FrameRing<VideoFrameBuffer>>,
    pub(crate) video_pool: Arc<BufferPool<VideoFrameBuffer>>,
    pub(crate) audio_pool: Arc<BufferPool<AudioFrameBuffer>>,
    pub(crate) clock: Arc<HardwareClock>,
    pub(crate) callbacks: Callbacks,
    pub(crate) counters: Counters,
    pub(crate) quit: AtomicBool,
    pub(crate) last_frame_requested: AtomicBool,
    pub(crate) drain: DrainTracker,
    pub(crate) capture_counter: AtomicU64,
    pub(crate) output_counter: AtomicU64,
}

impl Pipeline {
    fn active_stage_mask(&self) -> u32 {
        let media = if self.config.hardware_encode {
            STAGE_CODEC_RAW | STAGE_CODEC_HEVC | STAGE_HEVC_OUT
        } else {
            STAGE_VIDEO_OUT
        };
        STAGE_INPUT | STAGE_AUDIO_OUT | media
    }

    /// Presentation stamp for a capture sequence number, in 90 kHz units.
    pub(crate) fn pts_90k(&self, seq: u64) -> u64 {
        let rate = self.config.video_mode.frame_rate();
        if rate.numerator == 0 {
            return 0;
        }
        (seq as u128 * 90_000 * rate.denominator as u128 / rate.numerator as u128) as u64
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            frames_captured: self.counters.frames_captured.load(Ordering::Relaxed),
            video_delivered: self.counters.video_delivered.load(Ordering::Relaxed),
            video_dropped: self.counters.video_dropped.load(Ordering::Relaxed),
            callbacks_declined: self.counters.callbacks_declined.load(Ordering::Relaxed),
            encoded_delivered: self.counters.encoded_delivered.load(Ordering::Relaxed),
            audio_drained: self.counters.audio_drained.load(Ordering::Relaxed),
            drained: {
                let mask = self.active_stage_mask();
                self.drain.marked() & mask == mask
            },
        }
    }
}

/// The capture/transfer engine.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use ftl::{EngineConfig, TransferEngine};
/// use ftl::hal::sim::SimDriver;
///
/// # fn main() -> ftl::Result<()> {
/// let mut engine = TransferEngine::new(Arc::new(SimDriver::new()));
/// engine.open("sim-0")?;
/// engine.init(EngineConfig::default())?;
/// engine.set_video_callback(|frame| {
///     println!("frame {} at {}", frame.frame_number, frame.capture_time);
///     true
/// })?;
/// engine.run()?;
/// // ... capture ...
/// engine.quit()?;
/// # Ok(())
/// # }
/// ```
pub struct TransferEngine {
    driver: Arc<dyn DeviceDriver>,
    state: EngineState,
    device: Option<Arc<dyn DeviceHandle>>,
    pipeline: Option<Arc<Pipeline>>,
    workers: Vec<JoinHandle<()>>,
}

impl TransferEngine {
    /// An engine over the given driver, in the uninitialized state.
    pub fn new(driver: Arc<dyn DeviceDriver>) -> Self {
        Self {
            driver,
            state: EngineState::Uninitialized,
            device: None,
            pipeline: None,
            workers: Vec::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Binds the engine to the device matching `specifier`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if no device matches.
    pub fn open(&mut self, specifier: &str) -> Result<()> {
        match self.state {
            EngineState::Uninitialized | EngineState::Opened => {}
            state => {
                return Err(Error::WrongState {
                    operation: "open",
                    state,
                });
            }
        }
        let device = self.driver.open(specifier).map_err(|err| match err {
            HalError::NotFound(name) => Error::DeviceNotFound(name),
            other => Error::Hal(other),
        })?;
        info!(specifier, name = %device.info().display_name, "device opened");
        self.device = Some(device);
        self.state = EngineState::Opened;
        Ok(())
    }

    /// Programs the device per `config` and builds the frame pipeline.
    ///
    /// Setup steps are not individually retryable: on failure the engine
    /// falls back to `Opened` and the whole `init` must be repeated.
    pub fn init(&mut self, config: EngineConfig) -> Result<()> {
        match self.state {
            EngineState::Opened | EngineState::Initialized => {}
            state => {
                return Err(Error::WrongState {
                    operation: "init",
                    state,
                });
            }
        }
        self.state = EngineState::Opened;
        self.pipeline = None;

        let device = self.device.clone().expect("opened engine has a device");
        let info = device.info();
        if config.channel >= info.channels {
            return Err(Error::SetupFailure(format!(
                "channel {} out of range for {} ({} channels)",
                config.channel, info.specifier, info.channels
            )));
        }

        let channel = config.channel;
        match config.routing {
            RouteTopology::QuadSingleStream => {
                // Four links feed one frame store; the stream lives on the
                // first channel and claims the other three links.
                if channel != 0 {
                    return Err(Error::SetupFailure(
                        "quad-link capture must use channel 0".to_string(),
                    ));
                }
                if info.channels < 4 {
                    return Err(Error::SetupFailure(format!(
                        "{} has {} channels, quad-link needs 4",
                        info.specifier, info.channels
                    )));
                }
            }
            RouteTopology::SingleStreamLegacy => {
                if channel != 0 {
                    return Err(Error::SetupFailure(
                        "legacy routing is fixed to channel 0".to_string(),
                    ));
                }
            }
            RouteTopology::MultiStreamPerChannel => {}
        }
        device
            .configure_video(channel, config.video_mode, config.pixel_format)
            .map_err(|err| Error::SetupFailure(format!("video format programming: {err}")))?;
        device
            .route_signal(channel, config.routing)
            .map_err(|err| Error::SetupFailure(format!("signal routing: {err}")))?;
        device
            .bind_audio_system(channel, &config.audio)
            .map_err(|err| Error::SetupFailure(format!("audio system binding: {err}")))?;

        let codec = if config.hardware_encode {
            let codec = device.encoder().ok_or_else(|| {
                Error::SetupFailure(format!("{} has no hardware codec", info.specifier))
            })?;
            encoder::start_encoder(codec.as_ref(), channel)?;
            Some(codec)
        } else {
            None
        };

        let frame_size = config.frame_size();
        let audio_frame_size = config.audio_frame_size();
        let frame_duration = config.video_mode.frame_rate().interval_ns();

        let pipeline = Pipeline {
            encoder: codec,
            frame_duration,
            video_ring: FrameRing::new(config.video_ring_depth, || {
                VideoFrameBuffer::with_capacity(frame_size)
            }),
            audio_ring: FrameRing::new(config.audio_ring_depth(), || {
                AudioFrameBuffer::with_capacity(audio_frame_size)
            }),
            encoded_ring: config.hardware_encode.then(|| {
                FrameRing::new(config.video_ring_depth, || {
                    VideoFrameBuffer::with_capacity(frame_size)
                })
            }),
            video_pool: BufferPool::new("video", config.pool_slots, || {
                VideoFrameBuffer::with_capacity(frame_size)
            }),
            audio_pool: BufferPool::new("audio", config.pool_slots, || {
                AudioFrameBuffer::with_capacity(audio_frame_size)
            }),
            clock: Arc::new(HardwareClock::new(
                device.clone(),
                channel,
                config.audio.sample_rate,
            )),
            callbacks: Callbacks::default(),
            counters: Counters::default(),
            quit: AtomicBool::new(false),
            last_frame_requested: AtomicBool::new(false),
            drain: DrainTracker::new(),
            capture_counter: AtomicU64::new(0),
            output_counter: AtomicU64::new(0),
            device,
            config,
        };

        info!(
            channel,
            mode = ?pipeline.config.video_mode,
            format = ?pipeline.config.pixel_format,
            encode = pipeline.config.hardware_encode,
            frame_size,
            "engine initialized"
        );
        self.pipeline = Some(Arc::new(pipeline));
        self.state = EngineState::Initialized;
        Ok(())
    }

    /// Starts the hardware transfer and spawns the worker threads for the
    /// configured mode. A second call while running is a no-op.
    pub fn run(&mut self) -> Result<()> {
        match self.state {
            EngineState::Running => return Ok(()),
            EngineState::Initialized => {}
            state => {
                return Err(Error::WrongState {
                    operation: "run",
                    state,
                });
            }
        }
        let pipeline = self
            .pipeline
            .clone()
            .expect("initialized engine has a pipeline");
        let channel = pipeline.config.channel;

        pipeline.device.start_transfer(channel)?;
        pipeline.clock.set_started(true);

        let mut handles = Vec::new();
        let mut spawn = |name: &'static str,
                         worker: Box<dyn FnOnce() + Send>|
         -> Result<()> {
            let handle = std::thread::Builder::new()
                .name(name.to_string())
                .spawn(worker)
                .map_err(|err| Error::SetupFailure(format!("spawning {name}: {err}")))?;
            handles.push(handle);
            Ok(())
        };

        let p = pipeline.clone();
        spawn("ftl-input", Box::new(move || workers::input_worker(p)))?;
        if pipeline.config.hardware_encode {
            let p = pipeline.clone();
            spawn("ftl-codec-raw", Box::new(move || workers::codec_raw_worker(p)))?;
            let p = pipeline.clone();
            spawn("ftl-codec-hevc", Box::new(move || workers::codec_hevc_worker(p)))?;
            let p = pipeline.clone();
            spawn("ftl-hevc-out", Box::new(move || workers::hevc_output_worker(p)))?;
        } else {
            let p = pipeline.clone();
            spawn("ftl-video-out", Box::new(move || workers::video_output_worker(p)))?;
        }
        let p = pipeline.clone();
        spawn("ftl-audio-out", Box::new(move || workers::audio_output_worker(p)))?;

        self.workers = handles;
        self.state = EngineState::Running;
        info!(workers = self.workers.len(), "engine running");
        Ok(())
    }

    /// Cooperative shutdown.
    ///
    /// Raises the last-frame intent, waits (bounded by [`DRAIN_TIMEOUT`])
    /// for every active stage to propagate the marker, drives the codec stop
    /// sequence once the software side has drained, then stops the transfer
    /// and joins the workers. A drain timeout is logged and shutdown
    /// proceeds; this is best-effort drain, not guaranteed-lossless.
    pub fn quit(&mut self) -> Result<()> {
        match self.state {
            EngineState::Stopped => return Ok(()),
            EngineState::Running => {}
            state => {
                return Err(Error::WrongState {
                    operation: "quit",
                    state,
                });
            }
        }
        self.state = EngineState::Quitting;
        let pipeline = self.pipeline.clone().expect("running engine has a pipeline");

        pipeline.last_frame_requested.store(true, Ordering::Release);
        let mask = pipeline.active_stage_mask();
        if !pipeline.drain.wait_all(mask, DRAIN_TIMEOUT) {
            error!(
                marked = pipeline.drain.marked(),
                expected = mask,
                "drain timed out; stopping with frames in flight"
            );
        }

        if let Some(codec) = &pipeline.encoder {
            encoder::stop_encoder(codec.as_ref(), pipeline.config.channel);
        }

        pipeline.quit.store(true, Ordering::Release);
        pipeline.video_ring.abort();
        pipeline.audio_ring.abort();
        if let Some(ring) = &pipeline.encoded_ring {
            ring.abort();
        }
        if let Err(err) = pipeline.device.stop_transfer(pipeline.config.channel) {
            warn!(%err, "stopping device transfer failed");
        }

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        pipeline.clock.set_started(false);
        self.state = EngineState::Stopped;
        info!("engine stopped");
        Ok(())
    }

    /// Installs the video delivery callback, replacing any previous one.
    ///
    /// Frames produced while no callback is installed are released
    /// immediately rather than leaked.
    pub fn set_video_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(PoolBuffer<VideoFrameBuffer>) -> bool + Send + Sync + 'static,
    {
        let pipeline = self.require_pipeline("install video callback")?;
        *pipeline.callbacks.video.lock().unwrap() = Some(Arc::new(callback));
        Ok(())
    }

    /// Installs the audio delivery callback, replacing any previous one.
    ///
    /// The route is prepared for adapters that pull audio through the pool;
    /// the engine itself delivers video only.
    pub fn set_audio_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(PoolBuffer<AudioFrameBuffer>) -> bool + Send + Sync + 'static,
    {
        let pipeline = self.require_pipeline("install audio callback")?;
        *pipeline.callbacks.audio.lock().unwrap() = Some(Arc::new(callback));
        Ok(())
    }

    /// Takes a free video output buffer, or `None` under backpressure.
    pub fn acquire_video_buffer(&self) -> Option<PoolBuffer<VideoFrameBuffer>> {
        self.pipeline.as_ref()?.video_pool.acquire()
    }

    /// Takes a free audio output buffer, or `None` under backpressure.
    pub fn acquire_audio_buffer(&self) -> Option<PoolBuffer<AudioFrameBuffer>> {
        self.pipeline.as_ref()?.audio_pool.acquire()
    }

    /// The clock projecting this device's audio counter, once initialized.
    pub fn hardware_clock(&self) -> Option<Arc<HardwareClock>> {
        self.pipeline.as_ref().map(|p| p.clock.clone())
    }

    /// Description of the opened device, if any.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.device.as_ref().map(|d| d.info())
    }

    /// Snapshot of the delivery counters. Zeroed before initialization.
    pub fn stats(&self) -> EngineStats {
        self.pipeline
            .as_ref()
            .map(|p| p.snapshot())
            .unwrap_or_default()
    }

    fn require_pipeline(&self, operation: &'static str) -> Result<&Arc<Pipeline>> {
        self.pipeline.as_ref().ok_or(Error::WrongState {
            operation,
            state: self.state,
        })
    }
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        if self.state == EngineState::Running
            && let Err(err) = self.quit()
        {
            error!(%err, "engine shutdown on drop failed");
        }
    }
}
