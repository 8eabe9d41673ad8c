// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Monotonic clock over the device's free-running audio sample counter.
//!
//! The card's audio clock advances regardless of transfer activity, which
//! makes it the one time source an audio and a video source sharing a device
//! can both observe. [`HardwareClock::get_internal_time`] projects that
//! counter onto a monotonic nanosecond timeline: the first successful read
//! establishes the origin, a capture restart is corrected exactly once, and
//! neither counter wraparound nor a failed register read can ever make the
//! reported time regress.

use std::sync::{Arc, Mutex};

use tracing::trace;

use ftl_hal::DeviceHandle;

#[derive(Default)]
struct ClockState {
    started: bool,
    /// Scaled counter value at the first successful read.
    start_time: Option<u64>,
    /// Last elapsed value, before offset subtraction.
    last_raw: u64,
    /// Last reported value, after offset subtraction.
    last_time: u64,
    /// Correction accumulated across capture restarts.
    offset: i64,
    /// A restart correction is pending.
    restart: bool,
}

/// Restart-tolerant monotonic projection of the hardware audio clock.
pub struct HardwareClock {
    device: Arc<dyn DeviceHandle>,
    channel: usize,
    sample_rate: u64,
    /// Fixed value added to every reported time, letting several clocks
    /// share one timeline.
    epoch: u64,
    state: Mutex<ClockState>,
}

impl HardwareClock {
    /// A clock over `device`'s sample counter for `channel`.
    pub fn new(device: Arc<dyn DeviceHandle>, channel: usize, sample_rate: u32) -> Self {
        Self::with_epoch(device, channel, sample_rate, 0)
    }

    /// As [`Self::new`], with a fixed epoch added to every reported time.
    pub fn with_epoch(
        device: Arc<dyn DeviceHandle>,
        channel: usize,
        sample_rate: u32,
        epoch: u64,
    ) -> Self {
        Self {
            device,
            channel,
            sample_rate: sample_rate as u64,
            epoch,
            state: Mutex::new(ClockState::default()),
        }
    }

    /// Marks the clock running or stopped. While stopped, reads return the
    /// last reported value unchanged.
    pub fn set_started(&self, started: bool) {
        self.state.lock().unwrap().started = started;
    }

    /// Announces a capture restart. The next successful read recomputes the
    /// offset once, so the timeline continues instead of jumping.
    pub fn restart(&self) {
        self.state.lock().unwrap().restart = true;
    }

    /// Current time on this clock's timeline, in nanoseconds.
    ///
    /// Never blocks, never fails and never regresses: a failed counter read
    /// returns the last reported value unchanged.
    pub fn get_internal_time(&self) -> u64 {
        let mut st = self.state.lock().unwrap();
        if !st.started {
            return st.last_time + self.epoch;
        }

        let samples = match self.device.audio_sample_count(self.channel) {
            Ok(samples) => samples,
            Err(err) => {
                trace!(channel = self.channel, %err, "sample counter read failed");
                return st.last_time + self.epoch;
            }
        };
        let now = (samples as u128 * 1_000_000_000 / self.sample_rate as u128) as u64;

        let start = *st.start_time.get_or_insert(now);
        let mut elapsed = now.saturating_sub(start);

        if st.restart {
            st.offset = elapsed as i64 - st.last_raw as i64;
            st.restart = false;
            trace!(channel = self.channel, offset = st.offset, "restart correction applied");
        } else if elapsed < st.last_raw {
            // Counter wrapped or regressed without a restart event.
            elapsed = st.last_raw;
        }
        st.last_raw = elapsed;

        let mut time = (elapsed as i64 - st.offset).max(0) as u64;
        if time < st.last_time {
            time = st.last_time;
        }
        st.last_time = time;

        time + self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftl_hal::RouteTopology;
    use ftl_hal::sim::SimDevice;

    fn running_device() -> Arc<SimDevice> {
        let sim = SimDevice::new("sim-0");
        sim.route_signal(0, RouteTopology::SingleStreamLegacy).unwrap();
        sim.start_transfer(0).unwrap();
        sim
    }

    fn deliver_frames(sim: &SimDevice, n: u32) {
        let mut video = vec![0u8; 64];
        let mut audio = vec![0u8; 1 << 16];
        sim.credit_frames(n);
        for _ in 0..n {
            sim.transfer_frame(0, &mut video, &mut audio).unwrap();
        }
    }

    #[test]
    fn reports_zero_until_started() {
        let sim = running_device();
        let clock = HardwareClock::new(sim.clone(), 0, 48_000);
        assert_eq!(clock.get_internal_time(), 0);
        deliver_frames(&sim, 5);
        assert_eq!(clock.get_internal_time(), 0);
    }

    #[test]
    fn advances_with_the_sample_counter() {
        let sim = running_device();
        let clock = HardwareClock::new(sim.clone(), 0, 48_000);
        clock.set_started(true);

        let t0 = clock.get_internal_time();
        deliver_frames(&sim, 25);
        let t1 = clock.get_internal_time();
        // 25 frames at 25 fps is one second of audio.
        assert_eq!(t1 - t0, 1_000_000_000);
    }

    #[test]
    fn read_failure_returns_last_value() {
        let sim = running_device();
        let clock = HardwareClock::new(sim.clone(), 0, 48_000);
        clock.set_started(true);
        clock.get_internal_time();

        deliver_frames(&sim, 10);
        let before = clock.get_internal_time();
        assert!(before > 0);
        sim.fail_sample_counter(true);
        assert_eq!(clock.get_internal_time(), before);
        sim.fail_sample_counter(false);
        deliver_frames(&sim, 1);
        assert!(clock.get_internal_time() >= before);
    }

    #[test]
    fn never_regresses_across_restart() {
        let sim = running_device();
        let clock = HardwareClock::new(sim.clone(), 0, 48_000);
        clock.set_started(true);
        clock.get_internal_time();

        deliver_frames(&sim, 50);
        let before = clock.get_internal_time();
        assert_eq!(before, 2_000_000_000);

        // Capture restart resets the hardware counter to zero.
        sim.restart_counter();
        clock.restart();

        let mut last = before;
        for _ in 0..20 {
            deliver_frames(&sim, 1);
            let now = clock.get_internal_time();
            assert!(now >= last, "clock regressed: {now} < {last}");
            last = now;
        }
        // The timeline kept advancing after the restart correction.
        assert!(last > before);
    }

    #[test]
    fn epoch_is_added_to_every_report() {
        let sim = running_device();
        let clock = HardwareClock::with_epoch(sim.clone(), 0, 48_000, 500);
        assert_eq!(clock.get_internal_time(), 500);
        clock.set_started(true);
        deliver_frames(&sim, 1);
        assert!(clock.get_internal_time() >= 500);
    }
}
