// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Hardware HEVC codec contract.
//!
//! The codec runs its own firmware with an internal state machine. Every
//! state transition is requested with a `set_*` call and must be confirmed
//! by the caller with a single matching `get`. The firmware treats a
//! mismatch as a fatal setup defect, so there is no retry protocol at this
//! boundary.

use std::time::Duration;

use crate::{HalResult, RawPictureInfo};

/// Main codec firmware state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncoderState {
    /// Firmware loaded, waiting for host initialization.
    Boot,
    /// Initialized and idle.
    Init,
    /// Accepting raw pictures and emitting access units.
    Encode,
    /// Host has announced the end of the session.
    ReadyToStop,
    /// Encoding halted, buffers flushed.
    Stop,
}

impl std::fmt::Display for EncoderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EncoderState::Boot => "boot",
            EncoderState::Init => "init",
            EncoderState::Encode => "encode",
            EncoderState::ReadyToStop => "ready-to-stop",
            EncoderState::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// Per-channel video input sub-state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VinState {
    Stop,
    Start,
}

/// Per-channel encode helper sub-state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EhState {
    Stop,
    Start,
}

/// Metadata returned with one encoded access unit.
#[derive(Clone, Copy, Debug, Default)]
pub struct EncodedInfo {
    /// Valid bytes written into the caller's buffer.
    pub bytes: usize,
    /// Picture serial number this access unit encodes.
    pub serial: u64,
    /// Presentation timestamp in 90 kHz units.
    pub pts_90k: u64,
    /// Set on the access unit encoding the session's final picture.
    pub last_frame: bool,
}

/// The hardware codec.
pub trait EncoderHandle: Send + Sync {
    /// Reads the main firmware state.
    fn main_state(&self) -> HalResult<EncoderState>;

    /// Requests a main state transition. Confirm with [`Self::main_state`].
    fn set_main_state(&self, state: EncoderState) -> HalResult<()>;

    /// Reads the video input sub-state for a channel.
    fn vin_state(&self, channel: usize) -> HalResult<VinState>;

    /// Requests a video input transition. Confirm with [`Self::vin_state`].
    fn set_vin_state(&self, channel: usize, state: VinState) -> HalResult<()>;

    /// Reads the encode helper sub-state for a channel.
    fn eh_state(&self, channel: usize) -> HalResult<EhState>;

    /// Requests an encode helper transition. Confirm with [`Self::eh_state`].
    fn set_eh_state(&self, channel: usize, state: EhState) -> HalResult<()>;

    /// Submits one raw picture to the codec.
    fn transfer_raw(&self, channel: usize, frame: &[u8], picture: &RawPictureInfo)
    -> HalResult<()>;

    /// Retrieves one encoded access unit into `buf`, blocking until output
    /// is available or `timeout` elapses.
    ///
    /// Encode completion is signaled by this call returning, there is no
    /// separate completion poll.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HalError::Timeout`] if nothing was produced within
    /// `timeout`.
    fn transfer_encoded(
        &self,
        channel: usize,
        buf: &mut [u8],
        timeout: Duration,
    ) -> HalResult<EncodedInfo>;
}
