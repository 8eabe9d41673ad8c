// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the transfer engine in raw (non-encoded) mode.
//!
//! Each test drives a full engine against the simulator device, crediting
//! synthetic frames and observing the delivery callbacks.
//!
//! # Test Coverage
//!
//! - End-to-end capture at 720p59.94 with presentation timestamping
//! - Drain-before-stop shutdown with frames in flight
//! - Output pool backpressure when a consumer holds every buffer

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ftl::hal::Rational;
use ftl::hal::sim::{SimDevice, SimDriver};
use ftl::{EngineConfig, EngineState, TimeMapper, TransferEngine};
use tracing::info;

/// Ensures logging is initialized only once across all tests.
static LOG_ONCE: std::sync::Once = std::sync::Once::new();

/// Builds an engine bound to a fresh simulator device.
fn setup_test() -> (TransferEngine, Arc<SimDevice>) {
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .init();
    });

    let sim = SimDevice::new("sim-0");
    let driver = SimDriver::with_devices(vec![sim.clone()]);
    let mut engine = TransferEngine::new(Arc::new(driver));
    engine.open("sim-0").unwrap();
    (engine, sim)
}

/// Spins until `condition` holds, panicking after five seconds.
fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn raw_720p5994_config() -> EngineConfig {
    // Engine configurations arrive as JSON from the adapter layer.
    serde_json::from_str(
        r#"{
            "video_mode": "Hd720p5994",
            "pixel_format": "Yuv422_8",
            "routing": "MultiStreamPerChannel"
        }"#,
    )
    .unwrap()
}

/// 1/59.94 s, in nanoseconds.
const FRAME_59_94_NS: i64 = 16_683_350;

#[test]
fn raw_720p5994_delivers_every_frame_with_increasing_timestamps() {
    let (mut engine, sim) = setup_test();
    engine.init(raw_720p5994_config()).unwrap();

    let delivered: Arc<Mutex<Vec<(u64, u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    engine
        .set_video_callback(move |frame| {
            sink.lock()
                .unwrap()
                .push((frame.frame_number, frame.capture_time, frame.duration));
            true
        })
        .unwrap();
    engine.run().unwrap();

    for produced in 1..=120u64 {
        sim.credit_frames(1);
        wait_until("frame delivery", || {
            engine.stats().video_delivered == produced
        });
    }
    engine.quit().unwrap();

    let frames = delivered.lock().unwrap();
    assert_eq!(frames.len(), 120);

    // Translate capture stamps to presentation time the way a video source
    // adapter does, and require a strictly increasing sequence.
    let mut mapper = TimeMapper::new(Rational::new(60000, 1001));
    let mut previous_pts = None;
    for (index, &(seq, capture_time, duration)) in frames.iter().enumerate() {
        assert_eq!(seq, index as u64);
        assert!(
            (duration as i64 - FRAME_59_94_NS).abs() < 1_000,
            "frame duration {duration} more than 1 us from nominal"
        );
        let pts = mapper.observe(capture_time, seq * duration);
        if let Some(previous) = previous_pts {
            assert!(pts > previous, "pts {pts} not after {previous} at frame {index}");
        }
        previous_pts = Some(pts);
    }

    let stats = engine.stats();
    info!(?stats, "raw capture finished");
    assert_eq!(stats.frames_captured, 120);
    assert_eq!(stats.video_dropped, 0);
    assert_eq!(stats.audio_drained, 120);
}

#[test]
fn quit_drains_every_stage_before_stopping() {
    let (mut engine, sim) = setup_test();
    engine.init(raw_720p5994_config()).unwrap();
    engine.set_video_callback(|_frame| true).unwrap();
    engine.run().unwrap();

    // Leave frames in flight and shut down immediately.
    sim.credit_frames(10);
    wait_until("first capture", || engine.stats().frames_captured >= 1);
    engine.quit().unwrap();

    let stats = engine.stats();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(stats.drained, "a stage stopped without seeing the marker");
    // Every captured frame made it through the output stage before stop.
    assert_eq!(
        stats.video_delivered + stats.video_dropped + stats.callbacks_declined,
        stats.frames_captured
    );
}

#[test]
fn pool_exhaustion_reports_miss_without_blocking() {
    let (mut engine, sim) = setup_test();
    let mut config = raw_720p5994_config();
    config.pool_slots = 4;
    engine.init(config).unwrap();

    // A consumer that holds every buffer it is given.
    let held = Arc::new(Mutex::new(Vec::new()));
    let sink = held.clone();
    engine
        .set_video_callback(move |frame| {
            sink.lock().unwrap().push(frame);
            true
        })
        .unwrap();
    engine.run().unwrap();

    sim.credit_frames(6);
    wait_until("pool miss", || engine.stats().video_dropped >= 1);

    let stats = engine.stats();
    assert_eq!(stats.video_delivered, 4, "only four buffers existed to hand out");
    assert_eq!(held.lock().unwrap().len(), 4);

    engine.quit().unwrap();
    assert!(engine.stats().drained);
}

#[test]
fn open_reports_missing_device() {
    let (mut engine, _sim) = setup_test();
    let mut other = TransferEngine::new(Arc::new(SimDriver::new()));
    assert!(matches!(
        other.open("sim-7"),
        Err(ftl::Error::DeviceNotFound(_))
    ));
    // The bound engine is unaffected.
    engine.init(raw_720p5994_config()).unwrap();
}

#[test]
fn init_rejects_out_of_range_channel() {
    let (mut engine, _sim) = setup_test();
    let mut config = raw_720p5994_config();
    config.channel = 9;
    assert!(matches!(
        engine.init(config),
        Err(ftl::Error::SetupFailure(_))
    ));
    // Re-init from Opened succeeds.
    assert_eq!(engine.state(), EngineState::Opened);
    engine.init(raw_720p5994_config()).unwrap();
}

#[test]
fn run_is_idempotent() {
    let (mut engine, sim) = setup_test();
    engine.init(raw_720p5994_config()).unwrap();
    engine.run().unwrap();
    engine.run().unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    sim.credit_frames(1);
    wait_until("capture", || engine.stats().frames_captured == 1);
    engine.quit().unwrap();
}
