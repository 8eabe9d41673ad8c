// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the hardware-encode pipeline.
//!
//! # Test Coverage
//!
//! - End-to-end encoded capture: access units arrive in serial order with
//!   advancing 90 kHz stamps, and the last-frame marker crosses the codec
//! - Codec bring-up confirmation mismatch is a fatal, re-triable setup error

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ftl::hal::sim::{SimDevice, SimDriver};
use ftl::{EngineConfig, EngineState, TransferEngine};
use tracing::info;

/// Ensures logging is initialized only once across all tests.
static LOG_ONCE: std::sync::Once = std::sync::Once::new();

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

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn encode_config() -> EngineConfig {
    serde_json::from_str(
        r#"{
            "video_mode": "Hd1080p25",
            "pixel_format": "Yuv422_8",
            "hardware_encode": true
        }"#,
    )
    .unwrap()
}

#[test]
fn encode_pipeline_delivers_access_units_in_order() {
    let (mut engine, sim) = setup_test();
    engine.init(encode_config()).unwrap();

    let delivered: Arc<Mutex<Vec<(u64, u64, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    engine
        .set_video_callback(move |frame| {
            let picture = frame.picture_info.expect("encoded frames carry picture info");
            sink.lock()
                .unwrap()
                .push((picture.serial, picture.pts_90k, frame.len));
            true
        })
        .unwrap();
    engine.run().unwrap();

    for produced in 1..=30u64 {
        sim.credit_frames(1);
        wait_until("access unit delivery", || {
            engine.stats().encoded_delivered == produced
        });
    }
    engine.quit().unwrap();

    let units = delivered.lock().unwrap();
    assert_eq!(units.len(), 30);
    for (index, &(serial, pts_90k, len)) in units.iter().enumerate() {
        assert_eq!(serial, index as u64);
        // 90 kHz at 25 fps advances 3600 per picture.
        assert_eq!(pts_90k, index as u64 * 3600);
        assert!(len > 0);
    }

    let stats = engine.stats();
    info!(?stats, "encoded capture finished");
    assert!(stats.drained, "marker did not cross the codec path");
    assert_eq!(stats.video_delivered, 0, "raw delivery is bypassed in encode mode");
}

#[test]
fn encoder_bringup_mismatch_is_fatal_but_retriable() {
    let (mut engine, sim) = setup_test();
    sim.sim_encoder().fail_next_transition();

    assert!(matches!(
        engine.init(encode_config()),
        Err(ftl::Error::EncoderStateMismatch { .. })
    ));
    assert_eq!(engine.state(), EngineState::Opened);

    // The fault was one-shot; a fresh init from Opened succeeds.
    engine.init(encode_config()).unwrap();
    assert_eq!(engine.state(), EngineState::Initialized);
}
