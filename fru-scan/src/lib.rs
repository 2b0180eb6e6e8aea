// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Discovery and management of FRU EEPROMs on the host's I2C segments.
//!
//! This crate scans every non-blacklisted I2C adapter for IPMI FRU EEPROMs,
//! deduplicates devices that appear behind multiplexers, and publishes the
//! decoded inventory through an [`inventory::ObjectServer`] supplied by the
//! caller. The [`manager::FruManager`] task owns all of that state and
//! serializes rescans behind a debounce timer.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

pub mod baseboard;
pub mod blacklist;
pub mod dedup;
pub mod error;
pub mod i2c;
pub mod inventory;
pub mod manager;
pub mod probe;
pub mod write;

pub use manager::FruManager;
pub use manager::ScanConfig;

/// Kernel-assigned I2C adapter number. Bus 0 is reserved for the synthetic
/// baseboard device sourced from a file.
pub type BusId = u32;

/// 7-bit I2C device address. Wider than 7 bits only because the write path
/// walks past the probe range when it crosses EEPROM pages.
pub type DeviceAddress = u16;

pub const BASEBOARD_BUS: BusId = 0;
pub const BASEBOARD_ADDRESS: DeviceAddress = 0;

/// Raw FRU images found on one bus, keyed by device address.
pub type DeviceMap = BTreeMap<DeviceAddress, Vec<u8>>;

/// Everything the last scan found, keyed by bus then address.
pub type BusInventory = BTreeMap<BusId, DeviceMap>;

/// Buses that timed out; never probed again for the process lifetime.
pub type BusBlacklist = BTreeSet<BusId>;
