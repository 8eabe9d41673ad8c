// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Pipeline stage workers.
//!
//! One OS thread per stage, each a run-to-completion loop bounded by the
//! shared quit flag and its ring's own blocking waits. After a stage has
//! seen the last-frame marker it stops doing real work but keeps draining
//! its ring so the upstream stage can never deadlock against a full ring.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{error, trace, warn};

use ftl_hal::{HalError, RawPictureInfo};

use crate::engine::{
    Pipeline, STAGE_AUDIO_OUT, STAGE_CODEC_HEVC, STAGE_CODEC_RAW, STAGE_HEVC_OUT, STAGE_INPUT,
    STAGE_VIDEO_OUT,
};
use crate::frame::VideoFrameBuffer;

/// Wait granted to the codec for one encoded access unit before re-checking
/// the quit flag.
const ENCODED_WAIT: Duration = Duration::from_millis(100);

/// Drains the hardware into the raw video and audio rings.
///
/// Blocks on the vertical interrupt whenever the device backlog is at most
/// the in-flight capture frame; that wait is the pipeline's primary
/// backpressure and CPU-yield point.
pub(crate) fn input_worker(p: Arc<Pipeline>) {
    let channel = p.config.channel;
    while !p.quit.load(Ordering::Acquire) {
        if p.drain.is_marked(STAGE_INPUT) {
            // Marker published; idle on the frame clock until shutdown.
            p.device.wait_vertical_interrupt(channel);
            continue;
        }
        let last = p.last_frame_requested.load(Ordering::Acquire);
        let backlog = match p.device.transfer_status(channel) {
            Ok(status) => status.frames_ready,
            Err(err) => {
                warn!(%err, "transfer status query failed");
                p.device.wait_vertical_interrupt(channel);
                continue;
            }
        };

        if backlog > 1 {
            let Some(mut video) = p.video_ring.produce_next() else {
                break;
            };
            let Some(mut audio) = p.audio_ring.produce_next() else {
                break;
            };
            let seq = p.capture_counter.fetch_add(1, Ordering::AcqRel);
            match p.device.transfer_frame(channel, &mut video.data, &mut audio.data) {
                Ok(info) => {
                    video.len = video.data.len();
                    video.frame_number = seq;
                    video.timecode = info.timecode;
                    video.capture_time = 0;
                    video.duration = p.frame_duration;
                    audio.len = info.audio_bytes;
                    p.counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                    trace!(seq, audio_bytes = info.audio_bytes, "frame captured");
                }
                Err(err) => {
                    // Publish an empty slot instead of stalling the stream
                    // on a transfer glitch.
                    error!(%err, seq, "frame transfer failed");
                    video.len = 0;
                    video.frame_number = seq;
                    video.timecode = None;
                    audio.len = 0;
                }
            }
            video.last_frame = last;
            audio.last_frame = last;
            video.picture_info = p.config.hardware_encode.then(|| RawPictureInfo {
                serial: seq,
                pts_90k: p.pts_90k(seq),
                last_frame: last,
            });
            video.publish();
            audio.publish();
            if last {
                p.drain.mark(STAGE_INPUT);
            }
        } else if last {
            // Nothing buffered to carry the marker; publish an empty one so
            // the downstream stages can drain.
            let Some(mut video) = p.video_ring.produce_next() else {
                break;
            };
            let Some(mut audio) = p.audio_ring.produce_next() else {
                break;
            };
            let seq = p.capture_counter.fetch_add(1, Ordering::AcqRel);
            video.len = 0;
            video.frame_number = seq;
            video.timecode = None;
            video.last_frame = true;
            video.picture_info = p.config.hardware_encode.then(|| RawPictureInfo {
                serial: seq,
                pts_90k: p.pts_90k(seq),
                last_frame: true,
            });
            audio.len = 0;
            audio.last_frame = true;
            video.publish();
            audio.publish();
            p.drain.mark(STAGE_INPUT);
        } else {
            p.device.wait_vertical_interrupt(channel);
        }
    }
    trace!("input worker exiting");
}

/// Raw mode: consumes the video ring, copies into an output pool slot and
/// delivers through the video callback.
pub(crate) fn video_output_worker(p: Arc<Pipeline>) {
    while !p.quit.load(Ordering::Acquire) {
        let Some(frame) = p.video_ring.consume_next() else {
            break;
        };
        if !p.drain.is_marked(STAGE_VIDEO_OUT) && frame.len > 0 {
            forward_to_pool(&p, &frame, false);
        }
        if frame.last_frame {
            p.drain.mark(STAGE_VIDEO_OUT);
        }
        frame.release();
    }
    trace!("video output worker exiting");
}

/// Copies a ring frame into a pool slot, stamps delivery metadata and hands
/// it to the installed callback.
///
/// The copy is the one mandatory copy in the pipeline: the ring slot is
/// about to be reused for another hardware transfer, while the pool slot
/// lives as long as the consumer holds a reference.
fn forward_to_pool(p: &Pipeline, frame: &VideoFrameBuffer, encoded: bool) {
    let Some(mut out) = p.video_pool.acquire() else {
        p.counters.video_dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };
    let seq = p.output_counter.fetch_add(1, Ordering::AcqRel);
    {
        let dst = out.get_mut();
        dst.data[..frame.len].copy_from_slice(&frame.data[..frame.len]);
        dst.len = frame.len;
        dst.frame_number = seq;
        dst.timecode = frame.timecode;
        dst.picture_info = frame.picture_info;
        dst.last_frame = frame.last_frame;
        dst.capture_time = p.clock.get_internal_time();
        dst.duration = p.frame_duration;
    }

    let callback = p.callbacks.video.lock().unwrap().clone();
    match callback {
        Some(callback) => {
            if callback(out) {
                let counter = if encoded {
                    &p.counters.encoded_delivered
                } else {
                    &p.counters.video_delivered
                };
                counter.fetch_add(1, Ordering::Relaxed);
            } else {
                p.counters.callbacks_declined.fetch_add(1, Ordering::Relaxed);
            }
        }
        // No callback installed: release immediately rather than leak.
        None => drop(out),
    }
}

/// Encode mode: feeds raw ring frames into the hardware codec.
pub(crate) fn codec_raw_worker(p: Arc<Pipeline>) {
    let Some(codec) = p.encoder.clone() else {
        return;
    };
    let channel = p.config.channel;
    while !p.quit.load(Ordering::Acquire) {
        let Some(frame) = p.video_ring.consume_next() else {
            break;
        };
        if !p.drain.is_marked(STAGE_CODEC_RAW) {
            let picture = frame.picture_info.unwrap_or(RawPictureInfo {
                serial: frame.frame_number,
                pts_90k: p.pts_90k(frame.frame_number),
                last_frame: frame.last_frame,
            });
            if let Err(err) = codec.transfer_raw(channel, frame.payload(), &picture) {
                error!(%err, serial = picture.serial, "raw transfer to codec failed");
            }
        }
        if frame.last_frame {
            p.drain.mark(STAGE_CODEC_RAW);
        }
        frame.release();
    }
    trace!("codec raw worker exiting");
}

/// Encode mode: collects encoded access units into the encoded ring.
///
/// Encode completion is signaled by the codec's transfer call returning;
/// there is no separate poll.
pub(crate) fn codec_hevc_worker(p: Arc<Pipeline>) {
    let Some(codec) = p.encoder.clone() else {
        return;
    };
    let Some(ring) = p.encoded_ring.as_ref() else {
        return;
    };
    let channel = p.config.channel;
    while !p.quit.load(Ordering::Acquire) {
        let Some(mut slot) = ring.produce_next() else {
            break;
        };
        match codec.transfer_encoded(channel, &mut slot.data, ENCODED_WAIT) {
            Ok(info) => {
                slot.len = info.bytes;
                slot.frame_number = info.serial;
                slot.timecode = None;
                slot.picture_info = Some(RawPictureInfo {
                    serial: info.serial,
                    pts_90k: info.pts_90k,
                    last_frame: info.last_frame,
                });
                slot.last_frame = info.last_frame;
                let last = info.last_frame;
                trace!(serial = info.serial, bytes = info.bytes, "access unit collected");
                slot.publish();
                if last {
                    p.drain.mark(STAGE_CODEC_HEVC);
                }
            }
            Err(HalError::Timeout) => slot.cancel(),
            Err(err) => {
                error!(%err, "encoded transfer failed");
                slot.cancel();
            }
        }
    }
    trace!("codec hevc worker exiting");
}

/// Encode mode: consumes the encoded ring and delivers access units through
/// the video callback.
pub(crate) fn hevc_output_worker(p: Arc<Pipeline>) {
    let Some(ring) = p.encoded_ring.as_ref() else {
        return;
    };
    while !p.quit.load(Ordering::Acquire) {
        let Some(frame) = ring.consume_next() else {
            break;
        };
        if !p.drain.is_marked(STAGE_HEVC_OUT) && frame.len > 0 {
            forward_to_pool(&p, &frame, true);
        }
        if frame.last_frame {
            p.drain.mark(STAGE_HEVC_OUT);
        }
        frame.release();
    }
    trace!("hevc output worker exiting");
}

/// Drains the audio ring and watches for the shutdown marker.
///
/// Audio reaches adapters through the buffer-pool acquire route rather than
/// a push from this stage, so the loop is deliberately thin.
pub(crate) fn audio_output_worker(p: Arc<Pipeline>) {
    while !p.quit.load(Ordering::Acquire) {
        let Some(frame) = p.audio_ring.consume_next() else {
            break;
        };
        if frame.len > 0 {
            p.counters.audio_drained.fetch_add(1, Ordering::Relaxed);
        }
        if frame.last_frame {
            p.drain.mark(STAGE_AUDIO_OUT);
        }
        frame.release();
    }
    trace!("audio output worker exiting");
}
