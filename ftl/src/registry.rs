// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Device/channel registry.
//!
//! Two independent adapters - typically a video source and an audio source -
//! can share one physical input channel. The registry gives them a common
//! per-channel context to coordinate startup and shutdown through, and
//! rejects a second binding of the same media kind on a channel.
//!
//! The registry is an explicit value owned by the hosting application, not a
//! process-wide global. Device entries are created lazily on first
//! acquisition and never removed; the map is bounded by the device
//! inventory, but entries for unplugged devices stay behind - callers that
//! hot-unplug hardware own that cleanup problem.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::{Error, Result};

/// Channels tracked per device entry.
pub const CHANNELS_PER_DEVICE: usize = 8;

/// The media kind an adapter binds to a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}

/// Coordination state shared by the adapters bound to one channel.
#[derive(Default)]
pub struct ChannelShared {
    /// A video adapter holds this channel.
    pub video_bound: bool,
    /// An audio adapter holds this channel.
    pub audio_bound: bool,
    /// The channel's capture has been started by one of the adapters.
    pub started: bool,
}

/// One channel's shared context, with its own lock.
#[derive(Default)]
pub struct ChannelContext {
    shared: Mutex<ChannelShared>,
}

impl ChannelContext {
    /// Locks the shared coordination state.
    pub fn lock(&self) -> MutexGuard<'_, ChannelShared> {
        self.shared.lock().unwrap()
    }
}

struct DeviceChannels {
    channels: [Arc<ChannelContext>; CHANNELS_PER_DEVICE],
}

impl DeviceChannels {
    fn new() -> Self {
        Self {
            channels: std::array::from_fn(|_| Arc::new(ChannelContext::default())),
        }
    }
}

/// Registry of per-device, per-channel contexts.
pub struct ChannelRegistry {
    devices: Mutex<HashMap<String, Arc<DeviceChannels>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Binds `kind` on `channel` of the named device.
    ///
    /// The returned lease unbinds on drop. The device entry is created on
    /// first acquisition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelConflict`] if another adapter already bound
    /// this media kind on the channel, and [`Error::SetupFailure`] for an
    /// out-of-range channel index.
    pub fn acquire(&self, device: &str, channel: usize, kind: MediaKind) -> Result<ChannelLease> {
        if channel >= CHANNELS_PER_DEVICE {
            return Err(Error::SetupFailure(format!(
                "channel {channel} out of range (max {CHANNELS_PER_DEVICE})"
            )));
        }

        let context = {
            let mut devices = self.devices.lock().unwrap();
            let entry = devices
                .entry(device.to_string())
                .or_insert_with(|| Arc::new(DeviceChannels::new()));
            entry.channels[channel].clone()
        };

        {
            let mut shared = context.lock();
            let bound = match kind {
                MediaKind::Video => &mut shared.video_bound,
                MediaKind::Audio => &mut shared.audio_bound,
            };
            if *bound {
                return Err(Error::ChannelConflict {
                    device: device.to_string(),
                    channel,
                    kind,
                });
            }
            *bound = true;
        }
        trace!(device, channel, %kind, "channel bound");

        Ok(ChannelLease {
            context,
            device: device.to_string(),
            channel,
            kind,
        })
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A media-kind binding on one channel. Unbinds on drop.
pub struct ChannelLease {
    context: Arc<ChannelContext>,
    device: String,
    channel: usize,
    kind: MediaKind,
}

impl ChannelLease {
    /// The shared per-channel context, for startup/shutdown coordination
    /// with the other adapter on this channel.
    pub fn context(&self) -> &Arc<ChannelContext> {
        &self.context
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        let mut shared = self.context.lock();
        match self.kind {
            MediaKind::Video => shared.video_bound = false,
            MediaKind::Audio => shared.audio_bound = false,
        }
        trace!(device = %self.device, channel = self.channel, kind = %self.kind, "channel unbound");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_and_audio_share_a_channel() {
        let registry = ChannelRegistry::new();
        let video = registry.acquire("sim-0", 0, MediaKind::Video).unwrap();
        let audio = registry.acquire("sim-0", 0, MediaKind::Audio).unwrap();
        assert!(Arc::ptr_eq(video.context(), audio.context()));
    }

    #[test]
    fn double_bind_conflicts_until_released() {
        let registry = ChannelRegistry::new();
        let lease = registry.acquire("sim-0", 2, MediaKind::Video).unwrap();
        assert!(matches!(
            registry.acquire("sim-0", 2, MediaKind::Video),
            Err(Error::ChannelConflict { channel: 2, .. })
        ));
        drop(lease);
        assert!(registry.acquire("sim-0", 2, MediaKind::Video).is_ok());
    }

    #[test]
    fn devices_are_independent() {
        let registry = ChannelRegistry::new();
        let _a = registry.acquire("sim-0", 0, MediaKind::Video).unwrap();
        assert!(registry.acquire("sim-1", 0, MediaKind::Video).is_ok());
    }

    #[test]
    fn out_of_range_channel_is_a_setup_failure() {
        let registry = ChannelRegistry::new();
        assert!(matches!(
            registry.acquire("sim-0", CHANNELS_PER_DEVICE, MediaKind::Audio),
            Err(Error::SetupFailure(_))
        ));
    }

    #[test]
    fn shared_started_flag_coordinates_adapters() {
        let registry = ChannelRegistry::new();
        let video = registry.acquire("sim-0", 1, MediaKind::Video).unwrap();
        let audio = registry.acquire("sim-0", 1, MediaKind::Audio).unwrap();

        video.context().lock().started = true;
        assert!(audio.context().lock().started);
    }
}
