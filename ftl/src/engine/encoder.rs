// SPDX-FileCopyrightText: 2025 Contributors to the Frame Transfer Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Hardware codec bring-up and stop sequencing.
//!
//! Every transition is one `set` followed by one confirming `get`. A
//! mismatch during bring-up is a fatal setup error surfaced to the caller;
//! during stop it is logged and teardown continues, since the hardware must
//! still be returned toward idle.

use tracing::{error, info};

use ftl_hal::{EhState, EncoderHandle, EncoderState, VinState};

use crate::{Error, Result};

/// Drives the codec from boot to encoding:
/// `Boot -> Init -> VIN start -> EH start -> Encode`.
pub(crate) fn start_encoder(codec: &dyn EncoderHandle, channel: usize) -> Result<()> {
    let state = codec.main_state()?;
    if state != EncoderState::Boot {
        return Err(mismatch(EncoderState::Boot, state));
    }
    set_main(codec, EncoderState::Init)?;
    set_vin(codec, channel, VinState::Start)?;
    set_eh(codec, channel, EhState::Start)?;
    set_main(codec, EncoderState::Encode)?;
    info!(channel, "hardware codec encoding");
    Ok(())
}

/// Winds the codec down after the software pipeline has drained:
/// `ReadyToStop -> Stop -> VIN stop -> EH stop -> Init`.
pub(crate) fn stop_encoder(codec: &dyn EncoderHandle, channel: usize) {
    if let Err(err) = set_main(codec, EncoderState::ReadyToStop) {
        error!(%err, "codec ready-to-stop failed");
    }
    if let Err(err) = set_main(codec, EncoderState::Stop) {
        error!(%err, "codec stop failed");
    }
    if let Err(err) = set_vin(codec, channel, VinState::Stop) {
        error!(%err, channel, "codec video input stop failed");
    }
    if let Err(err) = set_eh(codec, channel, EhState::Stop) {
        error!(%err, channel, "codec encode helper stop failed");
    }
    if let Err(err) = set_main(codec, EncoderState::Init) {
        error!(%err, "codec return to init failed");
    }
    info!(channel, "hardware codec stopped");
}

fn set_main(codec: &dyn EncoderHandle, target: EncoderState) -> Result<()> {
    codec.set_main_state(target)?;
    let got = codec.main_state()?;
    if got != target {
        return Err(mismatch(target, got));
    }
    Ok(())
}

fn set_vin(codec: &dyn EncoderHandle, channel: usize, target: VinState) -> Result<()> {
    codec.set_vin_state(channel, target)?;
    let got = codec.vin_state(channel)?;
    if got != target {
        return Err(Error::EncoderStateMismatch {
            expected: format!("{target:?}"),
            actual: format!("{got:?}"),
        });
    }
    Ok(())
}

fn set_eh(codec: &dyn EncoderHandle, channel: usize, target: EhState) -> Result<()> {
    codec.set_eh_state(channel, target)?;
    let got = codec.eh_state(channel)?;
    if got != target {
        return Err(Error::EncoderStateMismatch {
            expected: format!("{target:?}"),
            actual: format!("{got:?}"),
        });
    }
    Ok(())
}

fn mismatch(expected: EncoderState, actual: EncoderState) -> Error {
    Error::EncoderStateMismatch {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}
