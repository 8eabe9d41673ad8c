// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for hardware boundary operations.

/// Convenience result type using [`HalError`] as the error variant.
pub type HalResult<T> = core::result::Result<T, HalError>;

/// Errors reported by a device driver or device handle.
///
/// These map the hardware SDK's failure conditions onto Rust error variants.
/// Transient conditions (a failed counter read, an encoder output timeout)
/// get their own variants so callers can recover locally instead of tearing
/// the pipeline down.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    /// No device matches the given specifier string.
    #[error("No device matches \"{0}\"")]
    NotFound(String),

    /// The requested format, routing or channel combination is not supported.
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    /// A frame transfer against the device failed.
    #[error("Transfer fault: {0}")]
    TransferFault(String),

    /// Reading the free-running audio sample counter failed.
    ///
    /// Callers are expected to fall back to their last known-good value.
    #[error("Audio sample counter read failed")]
    CounterReadFailed,

    /// The hardware codec reported a fault.
    #[error("Encoder fault: {0}")]
    EncoderFault(String),

    /// A blocking operation timed out before completing.
    #[error("Timeout")]
    Timeout,

    /// The operation requires a running transfer but none is active.
    #[error("Device transfer is not running")]
    NotRunning,
}
