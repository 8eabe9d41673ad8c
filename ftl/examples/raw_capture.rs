// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Captures frames from the simulator device in real time and reports the
//! delivery statistics.
//!
//! ```sh
//! cargo run --example raw_capture -- --seconds 2 --encode
//! ```

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::info;

use ftl::hal::VideoMode;
use ftl::hal::sim::{SimDevice, SimDriver};
use ftl::{EngineConfig, TransferEngine};

#[derive(Parser, Debug)]
#[command(about = "Run the frame transfer engine against the simulator")]
struct Args {
    /// Device specifier to open.
    #[arg(long, default_value = "sim-0")]
    device: String,

    /// How long to capture, in seconds.
    #[arg(long, default_value_t = 2)]
    seconds: u64,

    /// Route frames through the simulated hardware codec.
    #[arg(long, default_value_t = false)]
    encode: bool,
}

fn main() -> ftl::Result<()> {
    common::setup_logging();
    let args = Args::parse();

    let sim = SimDevice::new(&args.device);
    sim.set_realtime(true);
    let driver = SimDriver::with_devices(vec![sim]);

    let mut engine = TransferEngine::new(Arc::new(driver));
    engine.open(&args.device)?;
    engine.init(EngineConfig {
        video_mode: VideoMode::Hd720p5994,
        hardware_encode: args.encode,
        ..EngineConfig::default()
    })?;

    let received = Arc::new(AtomicU64::new(0));
    let counter = received.clone();
    engine.set_video_callback(move |frame| {
        let n = counter.fetch_add(1, Ordering::Relaxed);
        if n % 60 == 0 {
            info!(
                frame = frame.frame_number,
                bytes = frame.len,
                capture_time = frame.capture_time,
                "delivery"
            );
        }
        true
    })?;

    engine.run()?;
    std::thread::sleep(Duration::from_secs(args.seconds));
    engine.quit()?;

    let stats = engine.stats();
    info!(?stats, frames = received.load(Ordering::Relaxed), "capture finished");
    Ok(())
}
