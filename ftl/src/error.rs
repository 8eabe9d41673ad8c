// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the transfer engine.
//!
//! Configuration failures (device not found, unsupported setup, codec
//! confirmation mismatch) are fatal to the current lifecycle stage and
//! surfaced here. Conditions the engine recovers from locally - an exhausted
//! output pool, a failed counter read, a drain timeout - are reported through
//! logging and return values instead, never as an [`Error`].

use crate::engine::EngineState;
use crate::registry::MediaKind;

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur when driving the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No device matches the given specifier string.
    #[error("Device not found: \"{0}\"")]
    DeviceNotFound(String),

    /// A configuration step failed during initialization.
    ///
    /// Setup steps are not individually retryable; re-initialize from the
    /// opened state.
    #[error("Setup failure: {0}")]
    SetupFailure(String),

    /// A codec state transition was requested but the confirmation read
    /// observed a different state. Treated as a fatal setup defect.
    #[error("Encoder state mismatch: requested {expected}, device reports {actual}")]
    EncoderStateMismatch {
        /// The state the transition requested.
        expected: String,
        /// The state the confirmation read returned.
        actual: String,
    },

    /// The media kind is already bound on this channel by another adapter.
    #[error("Channel {channel} on \"{device}\" already has a {kind} binding")]
    ChannelConflict {
        device: String,
        channel: usize,
        kind: MediaKind,
    },

    /// The operation is not valid in the engine's current lifecycle state.
    #[error("Cannot {operation} while engine is {state:?}")]
    WrongState {
        operation: &'static str,
        state: EngineState,
    },

    /// An error reported by the hardware boundary.
    #[error("Hardware: {0}")]
    Hal(#[from] ftl_hal::HalError),
}
