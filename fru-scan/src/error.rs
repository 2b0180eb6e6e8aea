// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use crate::BusId;
use crate::DeviceAddress;
use fru_format::MAX_FRU_SIZE;
use slog_error_chain::SlogInlineError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, SlogInlineError)]
pub enum BlacklistError {
    #[error("failed to read blacklist {}: {err}", .path.display())]
    Read { path: PathBuf, err: io::Error },
    #[error("malformed blacklist {}: {err}", .path.display())]
    Parse { path: PathBuf, err: serde_json::Error },
}

#[derive(Debug, Error, SlogInlineError)]
pub enum OpenBusError {
    #[error("failed to open {}: {err}", .path.display())]
    Open { path: PathBuf, err: io::Error },
    #[error("failed to query functionality of bus {bus}: {err}")]
    Funcs { bus: BusId, err: io::Error },
    #[error("bus {bus} lacks the required SMBus read operations")]
    MissingSmbus { bus: BusId },
}

/// Failures looking up a raw FRU image; both map to an invalid-argument
/// reply on the management bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, SlogInlineError)]
pub enum InventoryError {
    #[error("invalid bus")]
    InvalidBus,
    #[error("invalid address")]
    InvalidAddress,
}

#[derive(Debug, Error, SlogInlineError)]
pub enum WriteError {
    #[error("image exceeds {MAX_FRU_SIZE} bytes")]
    TooLarge,
    #[error("image is not a decodable FRU")]
    InvalidImage(#[source] fru_format::DecodeError),
    #[error(transparent)]
    OpenBus(#[from] OpenBusError),
    #[error("failed to select device {address:#04x}: {err}")]
    SelectSlave { address: DeviceAddress, err: io::Error },
    #[error("failed to write byte {index}: {err}")]
    WriteByte { index: usize, err: io::Error },
    #[error("failed to replace the baseboard image: {0}")]
    Baseboard(#[source] io::Error),
}

impl WriteError {
    /// Whether the failure is the caller's fault (bad image) rather than an
    /// I/O problem; callers translate this into an invalid-argument reply.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, WriteError::TooLarge | WriteError::InvalidImage(_))
    }
}

#[derive(Debug, Error, SlogInlineError)]
#[error("object server rejected {path}: {reason}")]
pub struct PublishError {
    pub path: String,
    pub reason: String,
}
