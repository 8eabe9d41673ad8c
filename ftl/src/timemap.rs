// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Capture-to-presentation time mapping.
//!
//! The device stamps frames on its own free-running clock; the pipeline
//! presents them on its stream clock. [`TimeMapper`] learns the linear
//! relation between the two from a sliding window of observed
//! `(capture_time, stream_time)` pairs and translates every capture stamp
//! into a presentation timestamp.
//!
//! Two properties keep the output stable:
//!
//! - **Adaptive decimation.** The window takes every frame at first, then
//!   doubles the sampling interval each time it fills, up to roughly one
//!   sample every [`MAX_DECIMATION_SECONDS`]. Early responsiveness gives way
//!   to long-term stability once the mapping has converged.
//! - **Damped adoption.** A freshly regressed mapping is not applied
//!   outright. If its prediction for the current frame differs from the
//!   active mapping's by more than [`MAX_STEP_PER_FRAME_PERCENT`] of one
//!   frame duration, the active mapping is only nudged by that cap and
//!   rebased; the candidate replaces it outright only once the two agree.
//!   Unbounded adoption would turn every noisy window or transient clock
//!   drift into a visible timestamp jump.

use tracing::{debug, trace};

use ftl_hal::Rational;

/// Number of observation pairs in the regression window.
pub const TIMEMAP_WINDOW: usize = 64;

/// Bound on the timestamp discontinuity a single mapping update may apply,
/// as a percentage of one frame duration.
pub const MAX_STEP_PER_FRAME_PERCENT: u64 = 5;

/// Ceiling on the decimation interval: the window keeps taking at least one
/// sample roughly every this many seconds.
pub const MAX_DECIMATION_SECONDS: u64 = 4;

/// Linear mapping from capture time to presentation time.
///
/// `presentation = b + (capture - xbase) * num / den`, with the slope kept
/// as a rational so repeated application cannot accumulate floating-point
/// drift.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeMapping {
    xbase: u64,
    b: u64,
    num: u64,
    den: u64,
}

impl TimeMapping {
    /// The 1:1 mapping anchored at one observed pair.
    pub fn identity_at(capture_time: u64, stream_time: u64) -> Self {
        Self {
            xbase: capture_time,
            b: stream_time,
            num: 1,
            den: 1,
        }
    }

    /// Translates a capture timestamp into a presentation timestamp.
    pub fn apply(&self, capture_time: u64) -> u64 {
        if capture_time >= self.xbase {
            self.b
                .saturating_add(mul_div(capture_time - self.xbase, self.num, self.den))
        } else {
            self.b
                .saturating_sub(mul_div(self.xbase - capture_time, self.num, self.den))
        }
    }

    /// The slope as a reduced rational.
    pub fn slope(&self) -> (u64, u64) {
        (self.num, self.den)
    }
}

fn mul_div(value: u64, num: u64, den: u64) -> u64 {
    (value as u128 * num as u128 / den as u128) as u64
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Least-squares fit over the window, anchored at the window means so the
/// intercept is exact there. Returns the mapping and the fit's r².
fn linear_regression(pairs: &[(u64, u64)]) -> Option<(TimeMapping, f64)> {
    let n = pairs.len() as u128;
    if n < 2 {
        return None;
    }
    let xsum: u128 = pairs.iter().map(|&(x, _)| x as u128).sum();
    let ysum: u128 = pairs.iter().map(|&(_, y)| y as u128).sum();
    let xmean = (xsum / n) as u64;
    let ymean = (ysum / n) as u64;

    let mut sxx: i128 = 0;
    let mut sxy: i128 = 0;
    let mut syy: i128 = 0;
    for &(x, y) in pairs {
        let dx = x as i128 - xmean as i128;
        let dy = y as i128 - ymean as i128;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx == 0 || sxy <= 0 {
        // Degenerate window: no spread, or the clocks moved in opposite
        // directions. Keep the active mapping.
        return None;
    }

    let mut num = sxy as u128;
    let mut den = sxx as u128;
    let g = gcd(num, den);
    num /= g;
    den /= g;
    while num > u64::MAX as u128 || den > u64::MAX as u128 {
        num >>= 1;
        den >>= 1;
    }
    if den == 0 {
        return None;
    }

    let r_squared = if syy == 0 {
        1.0
    } else {
        (sxy as f64 * sxy as f64) / (sxx as f64 * syy as f64)
    };

    Some((
        TimeMapping {
            xbase: xmean,
            b: ymean,
            num: num as u64,
            den: den as u64,
        },
        r_squared,
    ))
}

/// Sliding-window estimator producing presentation timestamps.
pub struct TimeMapper {
    frame_duration: u64,
    /// Decimation ceiling in frames.
    max_skip: u64,
    window: Vec<(u64, u64)>,
    cursor: usize,
    /// Frames between window insertions.
    skip_period: u64,
    /// Frames since the last insertion.
    since_insert: u64,
    current: Option<TimeMapping>,
}

impl TimeMapper {
    /// An estimator for streams at the given frame rate.
    pub fn new(frame_rate: Rational) -> Self {
        Self {
            frame_duration: frame_rate.interval_ns(),
            max_skip: (MAX_DECIMATION_SECONDS * frame_rate.per_second_ceil()).max(1),
            window: Vec::with_capacity(TIMEMAP_WINDOW),
            cursor: 0,
            skip_period: 1,
            since_insert: 0,
            current: None,
        }
    }

    /// The active mapping, once at least one sample has been observed.
    pub fn current(&self) -> Option<TimeMapping> {
        self.current
    }

    /// Feeds one `(capture_time, stream_time)` observation and returns the
    /// presentation timestamp for it.
    ///
    /// The very first observation seeds a 1:1 mapping, so a usable timestamp
    /// comes back with zero prior samples.
    pub fn observe(&mut self, capture_time: u64, stream_time: u64) -> u64 {
        if self.current.is_none() {
            self.current = Some(TimeMapping::identity_at(capture_time, stream_time));
        }

        self.since_insert += 1;
        if self.since_insert >= self.skip_period {
            self.since_insert = 0;
            self.insert(capture_time, stream_time);
        }

        self.current
            .expect("mapping seeded above")
            .apply(capture_time)
    }

    fn insert(&mut self, capture_time: u64, stream_time: u64) {
        if self.window.len() < TIMEMAP_WINDOW {
            self.window.push((capture_time, stream_time));
        } else {
            self.window[self.cursor] = (capture_time, stream_time);
        }
        self.cursor = (self.cursor + 1) % TIMEMAP_WINDOW;

        if self.window.len() == TIMEMAP_WINDOW && self.cursor == 0 {
            self.refresh(capture_time);
            let doubled = self.skip_period.saturating_mul(2);
            self.skip_period = doubled.min(self.max_skip);
        }
    }

    /// Regresses over the filled window and adopts the result, damped.
    fn refresh(&mut self, capture_time: u64) {
        let Some((candidate, r_squared)) = linear_regression(&self.window) else {
            return;
        };
        let current = self.current.expect("refresh requires a seeded mapping");

        let current_prediction = current.apply(capture_time);
        let candidate_prediction = candidate.apply(capture_time);
        let cap = self.frame_duration * MAX_STEP_PER_FRAME_PERCENT / 100;
        let diff = candidate_prediction as i128 - current_prediction as i128;

        if diff.unsigned_abs() > cap as u128 {
            // Out of tolerance: nudge the intercept by at most the cap and
            // rebase at the current sample, keeping the active slope.
            let nudged = if diff > 0 {
                current_prediction + cap
            } else {
                current_prediction.saturating_sub(cap)
            };
            let (num, den) = current.slope();
            self.current = Some(TimeMapping {
                xbase: capture_time,
                b: nudged,
                num,
                den,
            });
            debug!(
                diff,
                cap, r_squared, "regression out of tolerance, nudging active mapping"
            );
        } else {
            self.current = Some(candidate);
            trace!(r_squared, "adopted regressed mapping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE_25: Rational = Rational::new(25, 1);
    const DUR_25: u64 = 40_000_000;

    #[test]
    fn first_sample_seeds_identity_mapping() {
        let mut mapper = TimeMapper::new(RATE_25);
        assert!(mapper.current().is_none());
        let pts = mapper.observe(1_000, 5_000);
        assert_eq!(pts, 5_000);
        // The seed tracks capture deltas one to one.
        assert_eq!(mapper.current().unwrap().apply(1_500), 5_500);
    }

    #[test]
    fn clean_data_adopts_unity_slope() {
        let mut mapper = TimeMapper::new(RATE_25);
        for i in 0..TIMEMAP_WINDOW as u64 {
            let t = i * DUR_25;
            let pts = mapper.observe(t, t);
            assert_eq!(pts, t);
        }
        let (num, den) = mapper.current().unwrap().slope();
        assert_eq!(num, den);
    }

    #[test]
    fn single_update_step_is_capped() {
        let mut mapper = TimeMapper::new(RATE_25);
        let cap = DUR_25 * MAX_STEP_PER_FRAME_PERCENT / 100;
        let step = 10 * cap;

        let mut frame = 0u64;
        let mut previous = None;
        // One clean window, then several windows with a step discontinuity
        // injected on the stream side.
        for _ in 0..TIMEMAP_WINDOW {
            let t = frame * DUR_25;
            previous = Some((mapper.observe(t, t), t));
            frame += 1;
        }
        for _ in 0..6 * TIMEMAP_WINDOW as u64 {
            let t = frame * DUR_25;
            let pts = mapper.observe(t, t + step);
            if let Some((prev_pts, prev_t)) = previous {
                let nominal = (t - prev_t) as i128;
                let advance = pts as i128 - prev_pts as i128;
                let distortion = (advance - nominal).unsigned_abs();
                assert!(
                    distortion <= cap as u128,
                    "frame {frame}: distortion {distortion} exceeds cap {cap}"
                );
            }
            previous = Some((pts, t));
            frame += 1;
        }
    }

    #[test]
    fn converges_toward_injected_offset() {
        let mut mapper = TimeMapper::new(RATE_25);
        let step = DUR_25; // one whole frame of offset
        let mut frame = 0u64;
        for _ in 0..TIMEMAP_WINDOW {
            let t = frame * DUR_25;
            mapper.observe(t, t);
            frame += 1;
        }
        let cap = DUR_25 * MAX_STEP_PER_FRAME_PERCENT / 100;
        let mut last_error = 0i128;
        for _ in 0..40 * TIMEMAP_WINDOW as u64 {
            let t = frame * DUR_25;
            let pts = mapper.observe(t, t + step);
            last_error = (t + step) as i128 - pts as i128;
            frame += 1;
        }
        // Each window fill closes the gap by one cap; with decimation
        // doubling, several fills happen in this span. The error must have
        // shrunk accordingly and never changed sign.
        assert!(last_error >= 0);
        assert!(
            last_error <= (step - 3 * cap) as i128,
            "mapping made no progress toward the offset: {last_error}"
        );
    }

    #[test]
    fn decimation_doubles_until_capped() {
        let mut mapper = TimeMapper::new(RATE_25);
        assert_eq!(mapper.skip_period, 1);
        let mut frame = 0u64;
        for _ in 0..TIMEMAP_WINDOW {
            let t = frame * DUR_25;
            mapper.observe(t, t);
            frame += 1;
        }
        assert_eq!(mapper.skip_period, 2);
        for _ in 0..2 * TIMEMAP_WINDOW {
            let t = frame * DUR_25;
            mapper.observe(t, t);
            frame += 1;
        }
        assert_eq!(mapper.skip_period, 4);
        assert_eq!(mapper.max_skip, MAX_DECIMATION_SECONDS * 25);
    }
}
