// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Software device simulator.
//!
//! Implements the driver, device and codec contracts without hardware so the
//! transfer engine can be developed and tested deterministically. Frames are
//! either credited explicitly ([`SimDevice::credit_frames`]) or paced by the
//! wall clock in real-time mode; the audio sample counter tracks delivered
//! frames exactly, with knobs for read failures and counter restarts.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::{
    AudioConfig, DeviceDriver, DeviceHandle, DeviceInfo, EhState, EncodedInfo, EncoderHandle,
    EncoderState, HalError, HalResult, PixelFormat, RawPictureInfo, RouteTopology, TimecodeWords,
    TransferInfo, TransferStatus, VideoMode, VinState,
};

/// Bound on a vertical-interrupt wait when no frame is pending, so callers
/// polling a shutdown flag are never parked for long.
const VBI_WAIT: Duration = Duration::from_millis(10);

/// Driver over a fixed set of simulated devices.
pub struct SimDriver {
    devices: Vec<Arc<SimDevice>>,
}

impl SimDriver {
    /// A driver exposing one default device, `"sim-0"`.
    pub fn new() -> Self {
        Self {
            devices: vec![SimDevice::new("sim-0")],
        }
    }

    /// A driver over the given devices.
    pub fn with_devices(devices: Vec<Arc<SimDevice>>) -> Self {
        Self { devices }
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDriver for SimDriver {
    fn enumerate(&self) -> Vec<DeviceInfo> {
        self.devices.iter().map(|d| d.info.clone()).collect()
    }

    fn open(&self, specifier: &str) -> HalResult<Arc<dyn DeviceHandle>> {
        self.devices
            .iter()
            .find(|d| d.info.specifier == specifier)
            .map(|d| d.clone() as Arc<dyn DeviceHandle>)
            .ok_or_else(|| HalError::NotFound(specifier.to_string()))
    }
}

struct SimState {
    mode: VideoMode,
    format: PixelFormat,
    audio: AudioConfig,
    routed: Option<RouteTopology>,
    running: bool,
    realtime: bool,
    /// Frames captured but not yet transferred to the host.
    pending: u32,
    /// Frames transferred to the host so far.
    delivered: u64,
    /// Sample count at the last counter restart.
    counter_base: u64,
    fail_counter: bool,
}

/// One simulated capture device.
pub struct SimDevice {
    info: DeviceInfo,
    encoder: Arc<SimEncoder>,
    state: Mutex<SimState>,
    frame_cv: Condvar,
}

impl SimDevice {
    /// Creates a device with four channels and a simulated codec.
    pub fn new(specifier: &str) -> Arc<Self> {
        let channels = 4;
        Arc::new(Self {
            info: DeviceInfo {
                specifier: specifier.to_string(),
                display_name: format!("FTL simulator ({specifier})"),
                channels,
                has_encoder: true,
            },
            encoder: Arc::new(SimEncoder::new(channels)),
            state: Mutex::new(SimState {
                mode: VideoMode::Hd1080p25,
                format: PixelFormat::Yuv422_8,
                audio: AudioConfig::default(),
                routed: None,
                running: false,
                realtime: false,
                pending: 0,
                delivered: 0,
                counter_base: 0,
                fail_counter: false,
            }),
            frame_cv: Condvar::new(),
        })
    }

    /// Makes `n` captured frames available for transfer.
    pub fn credit_frames(&self, n: u32) {
        let mut st = self.state.lock().unwrap();
        st.pending += n;
        self.frame_cv.notify_all();
    }

    /// In real-time mode each vertical-interrupt wait sleeps one frame
    /// interval and captures one frame, pacing the source from the wall
    /// clock instead of explicit credits.
    pub fn set_realtime(&self, on: bool) {
        self.state.lock().unwrap().realtime = on;
    }

    /// Makes subsequent audio sample counter reads fail.
    pub fn fail_sample_counter(&self, fail: bool) {
        self.state.lock().unwrap().fail_counter = fail;
    }

    /// Resets the free-running sample counter to zero, as a capture restart
    /// does on hardware.
    pub fn restart_counter(&self) {
        let mut st = self.state.lock().unwrap();
        st.counter_base = st
            .audio
            .samples_after_frames(st.delivered, st.mode.frame_rate());
    }

    /// Frames transferred to the host so far.
    pub fn frames_delivered(&self) -> u64 {
        self.state.lock().unwrap().delivered
    }

    /// Access to the simulated codec's test knobs.
    pub fn sim_encoder(&self) -> &Arc<SimEncoder> {
        &self.encoder
    }

    fn check_channel(&self, channel: usize) -> HalResult<()> {
        if channel >= self.info.channels {
            return Err(HalError::Unsupported(format!(
                "channel {channel} out of range for {}",
                self.info.specifier
            )));
        }
        Ok(())
    }
}

impl DeviceHandle for SimDevice {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn configure_video(
        &self,
        channel: usize,
        mode: VideoMode,
        format: PixelFormat,
    ) -> HalResult<()> {
        self.check_channel(channel)?;
        let mut st = self.state.lock().unwrap();
        st.mode = mode;
        st.format = format;
        trace!(specifier = %self.info.specifier, channel, ?mode, ?format, "video configured");
        Ok(())
    }

    fn route_signal(&self, channel: usize, topology: RouteTopology) -> HalResult<()> {
        self.check_channel(channel)?;
        self.state.lock().unwrap().routed = Some(topology);
        Ok(())
    }

    fn bind_audio_system(&self, channel: usize, config: &AudioConfig) -> HalResult<()> {
        self.check_channel(channel)?;
        self.state.lock().unwrap().audio = *config;
        Ok(())
    }

    fn start_transfer(&self, channel: usize) -> HalResult<()> {
        self.check_channel(channel)?;
        let mut st = self.state.lock().unwrap();
        if st.routed.is_none() {
            return Err(HalError::Unsupported("signal path not routed".to_string()));
        }
        st.running = true;
        Ok(())
    }

    fn stop_transfer(&self, channel: usize) -> HalResult<()> {
        self.check_channel(channel)?;
        let mut st = self.state.lock().unwrap();
        st.running = false;
        self.frame_cv.notify_all();
        Ok(())
    }

    fn transfer_status(&self, channel: usize) -> HalResult<TransferStatus> {
        self.check_channel(channel)?;
        let st = self.state.lock().unwrap();
        // The in-flight capture frame counts toward the backlog, as it does
        // in the hardware status register.
        let in_flight = if st.running { 1 } else { 0 };
        Ok(TransferStatus {
            frames_ready: st.pending + in_flight,
            running: st.running,
        })
    }

    fn transfer_frame(
        &self,
        channel: usize,
        video: &mut [u8],
        audio: &mut [u8],
    ) -> HalResult<TransferInfo> {
        self.check_channel(channel)?;
        let mut st = self.state.lock().unwrap();
        if !st.running {
            return Err(HalError::NotRunning);
        }
        if st.pending == 0 {
            return Err(HalError::TransferFault("no frame buffered".to_string()));
        }
        st.pending -= 1;
        let seq = st.delivered;
        st.delivered += 1;

        // Deterministic payload: sequence number in the first bytes.
        let header = seq.to_le_bytes();
        let n = header.len().min(video.len());
        video[..n].copy_from_slice(&header[..n]);

        let rate = st.mode.frame_rate();
        let samples = st.audio.samples_after_frames(seq + 1, rate)
            - st.audio.samples_after_frames(seq, rate);
        let audio_bytes = (samples as usize
            * st.audio.channels as usize
            * st.audio.bytes_per_sample as usize)
            .min(audio.len());
        let n = header.len().min(audio_bytes);
        audio[..n].copy_from_slice(&header[..n]);

        Ok(TransferInfo {
            audio_bytes,
            timecode: Some(TimecodeWords {
                dbb: 0,
                low: seq as u32,
                high: (seq >> 32) as u32,
            }),
        })
    }

    fn wait_vertical_interrupt(&self, channel: usize) {
        if self.check_channel(channel).is_err() {
            return;
        }
        let mut st = self.state.lock().unwrap();
        if st.realtime && st.running {
            let interval = Duration::from_nanos(st.mode.frame_rate().interval_ns());
            drop(st);
            std::thread::sleep(interval);
            let mut st = self.state.lock().unwrap();
            st.pending += 1;
            self.frame_cv.notify_all();
            return;
        }
        if st.pending == 0 {
            let (guard, _) = self.frame_cv.wait_timeout(st, VBI_WAIT).unwrap();
            drop(guard);
        }
    }

    fn audio_sample_count(&self, channel: usize) -> HalResult<u64> {
        self.check_channel(channel)?;
        let st = self.state.lock().unwrap();
        if st.fail_counter {
            return Err(HalError::CounterReadFailed);
        }
        let total = st
            .audio
            .samples_after_frames(st.delivered, st.mode.frame_rate());
        Ok(total.saturating_sub(st.counter_base))
    }

    fn encoder(&self) -> Option<Arc<dyn EncoderHandle>> {
        if self.info.has_encoder {
            Some(self.encoder.clone() as Arc<dyn EncoderHandle>)
        } else {
            None
        }
    }
}

struct EncodedUnit {
    data: Vec<u8>,
    serial: u64,
    pts_90k: u64,
    last_frame: bool,
}

struct EncState {
    main: EncoderState,
    vin: Vec<VinState>,
    eh: Vec<EhState>,
    fail_next_transition: bool,
    queue: VecDeque<EncodedUnit>,
}

/// Simulated hardware codec.
///
/// Runs the firmware state machine faithfully; the "bitstream" it emits is a
/// decimated copy of the input picture, a stand-in payload rather than real
/// HEVC.
pub struct SimEncoder {
    state: Mutex<EncState>,
    output_cv: Condvar,
}

impl SimEncoder {
    fn new(channels: usize) -> Self {
        Self {
            state: Mutex::new(EncState {
                main: EncoderState::Boot,
                vin: vec![VinState::Stop; channels],
                eh: vec![EhState::Stop; channels],
                fail_next_transition: false,
                queue: VecDeque::new(),
            }),
            output_cv: Condvar::new(),
        }
    }

    /// Silently drops the next requested state transition, so the caller's
    /// confirmation read observes the stale state.
    pub fn fail_next_transition(&self) {
        self.state.lock().unwrap().fail_next_transition = true;
    }

    fn check_channel(&self, channel: usize) -> HalResult<()> {
        if channel >= self.state.lock().unwrap().vin.len() {
            return Err(HalError::Unsupported(format!(
                "codec channel {channel} out of range"
            )));
        }
        Ok(())
    }
}

/// Stand-in compression: a sparse sample of the picture bytes behind a
/// start-code-like prefix.
fn compress(frame: &[u8]) -> Vec<u8> {
    if frame.is_empty() {
        // A flush picture carries no payload.
        return Vec::new();
    }
    let mut data = vec![0, 0, 0, 1];
    data.extend(frame.iter().step_by(64));
    data
}

impl EncoderHandle for SimEncoder {
    fn main_state(&self) -> HalResult<EncoderState> {
        Ok(self.state.lock().unwrap().main)
    }

    fn set_main_state(&self, state: EncoderState) -> HalResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.fail_next_transition {
            st.fail_next_transition = false;
            trace!(requested = %state, "dropping codec transition");
            return Ok(());
        }
        st.main = state;
        Ok(())
    }

    fn vin_state(&self, channel: usize) -> HalResult<VinState> {
        self.check_channel(channel)?;
        Ok(self.state.lock().unwrap().vin[channel])
    }

    fn set_vin_state(&self, channel: usize, state: VinState) -> HalResult<()> {
        self.check_channel(channel)?;
        let mut st = self.state.lock().unwrap();
        if st.fail_next_transition {
            st.fail_next_transition = false;
            return Ok(());
        }
        st.vin[channel] = state;
        Ok(())
    }

    fn eh_state(&self, channel: usize) -> HalResult<EhState> {
        self.check_channel(channel)?;
        Ok(self.state.lock().unwrap().eh[channel])
    }

    fn set_eh_state(&self, channel: usize, state: EhState) -> HalResult<()> {
        self.check_channel(channel)?;
        let mut st = self.state.lock().unwrap();
        if st.fail_next_transition {
            st.fail_next_transition = false;
            return Ok(());
        }
        st.eh[channel] = state;
        Ok(())
    }

    fn transfer_raw(
        &self,
        channel: usize,
        frame: &[u8],
        picture: &RawPictureInfo,
    ) -> HalResult<()> {
        self.check_channel(channel)?;
        let mut st = self.state.lock().unwrap();
        if st.main != EncoderState::Encode {
            return Err(HalError::EncoderFault(format!(
                "raw transfer in state {}",
                st.main
            )));
        }
        st.queue.push_back(EncodedUnit {
            data: compress(frame),
            serial: picture.serial,
            pts_90k: picture.pts_90k,
            last_frame: picture.last_frame,
        });
        self.output_cv.notify_all();
        Ok(())
    }

    fn transfer_encoded(
        &self,
        channel: usize,
        buf: &mut [u8],
        timeout: Duration,
    ) -> HalResult<EncodedInfo> {
        self.check_channel(channel)?;
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock().unwrap();
        while st.queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return Err(HalError::Timeout);
            }
            let (guard, _) = self
                .output_cv
                .wait_timeout(st, deadline - now)
                .unwrap();
            st = guard;
        }
        let unit = st.queue.pop_front().expect("queue checked non-empty");
        if buf.len() < unit.data.len() {
            return Err(HalError::EncoderFault(format!(
                "output buffer too small: {} < {}",
                buf.len(),
                unit.data.len()
            )));
        }
        buf[..unit.data.len()].copy_from_slice(&unit.data);
        Ok(EncodedInfo {
            bytes: unit.data.len(),
            serial: unit.serial,
            pts_90k: unit.pts_90k,
            last_frame: unit.last_frame,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_by_specifier() {
        let driver = SimDriver::new();
        assert!(driver.open("sim-0").is_ok());
        assert!(matches!(
            driver.open("sim-9"),
            Err(HalError::NotFound(_))
        ));
    }

    #[test]
    fn backlog_counts_in_flight_capture() {
        let driver = SimDriver::new();
        let device = driver.open("sim-0").unwrap();
        device
            .route_signal(0, RouteTopology::SingleStreamLegacy)
            .unwrap();
        device.start_transfer(0).unwrap();
        assert_eq!(device.transfer_status(0).unwrap().frames_ready, 1);
    }

    #[test]
    fn transfer_stamps_sequence() {
        let sim = SimDevice::new("sim-0");
        sim.route_signal(0, RouteTopology::SingleStreamLegacy).unwrap();
        sim.start_transfer(0).unwrap();
        sim.credit_frames(2);

        let mut video = vec![0u8; 64];
        let mut audio = vec![0u8; 4096];
        sim.transfer_frame(0, &mut video, &mut audio).unwrap();
        let info = sim.transfer_frame(0, &mut video, &mut audio).unwrap();
        assert_eq!(u64::from_le_bytes(video[..8].try_into().unwrap()), 1);
        assert!(info.audio_bytes > 0);
        assert_eq!(sim.frames_delivered(), 2);
    }

    #[test]
    fn counter_restart_rebases_to_zero() {
        let sim = SimDevice::new("sim-0");
        sim.route_signal(0, RouteTopology::SingleStreamLegacy).unwrap();
        sim.start_transfer(0).unwrap();
        sim.credit_frames(10);
        let mut video = vec![0u8; 64];
        let mut audio = vec![0u8; 65536];
        for _ in 0..10 {
            sim.transfer_frame(0, &mut video, &mut audio).unwrap();
        }
        assert!(sim.audio_sample_count(0).unwrap() > 0);
        sim.restart_counter();
        assert_eq!(sim.audio_sample_count(0).unwrap(), 0);
    }

    #[test]
    fn dropped_transition_leaves_state() {
        let enc = SimEncoder::new(1);
        enc.fail_next_transition();
        enc.set_main_state(EncoderState::Init).unwrap();
        assert_eq!(enc.main_state().unwrap(), EncoderState::Boot);
        enc.set_main_state(EncoderState::Init).unwrap();
        assert_eq!(enc.main_state().unwrap(), EncoderState::Init);
    }
}
