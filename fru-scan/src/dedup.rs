// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Object naming, and suppression of devices seen through I2C multiplexers.
//!
//! A single physical EEPROM behind a mux is visible both on the parent
//! segment and on every multiplexed child the kernel materializes. The copy
//! on the lowest-numbered bus is the canonical one; the rest are suppressed.
//! Distinct devices that happen to share a product name are disambiguated
//! with a numeric suffix instead.

use crate::BusId;
use crate::BusInventory;
use crate::DeviceAddress;
use fru_format::FieldMap;
use std::collections::BTreeMap;
use std::path::Path;

pub const OBJECT_PATH_PREFIX: &str = "/xyz/openbmc_project/FruDevice/";

/// A device object currently on the bus: its final path plus the base path
/// it was derived from (the base participates in collision counting).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedObject {
    pub base: String,
    pub path: String,
}

/// Where a candidate device should be published, if at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Publish(PublishedObject),
    /// Byte-identical twin of an object already published from a
    /// lower-numbered bus.
    MuxDuplicate,
}

/// Whether the kernel materialized this bus as a mux child.
pub fn is_mux_child(bus: BusId) -> bool {
    Path::new(&format!("/sys/bus/i2c/devices/i2c-{bus}/mux_device"))
        .is_symlink()
}

/// Decide the object path for the device at `(bus, address)` whose decoded
/// fields are `fields`, or suppress it as a mux duplicate.
///
/// `unknown_count` feeds the `UNKNOWN<n>` names handed to devices without a
/// usable product name; it resets every scan cycle.
pub fn place_device(
    fields: &FieldMap,
    bus: BusId,
    address: DeviceAddress,
    raw: &[u8],
    inventory: &BusInventory,
    published: &BTreeMap<(BusId, DeviceAddress), PublishedObject>,
    unknown_count: &mut usize,
    is_mux: impl Fn(BusId) -> bool,
) -> Placement {
    let name = product_name(fields, unknown_count);
    let base = format!("{OBJECT_PATH_PREFIX}{name}");

    // The baseboard (bus 0) never collides; everything else has to contend
    // with mux shadows and name twins.
    let mut collisions = 0;
    if bus > 0 {
        for ((other_bus, other_address), object) in published {
            if object.base != base {
                continue;
            }
            let other_raw = inventory
                .get(other_bus)
                .and_then(|devices| devices.get(other_address));
            if is_mux(bus)
                && *other_address == address
                && other_raw.map(Vec::as_slice) == Some(raw)
            {
                return Placement::MuxDuplicate;
            }
            collisions += 1;
        }
    }

    let path = if collisions == 0 {
        base.clone()
    } else {
        format!("{base}_{collisions}")
    };
    Placement::Publish(PublishedObject { base, path })
}

fn product_name(fields: &FieldMap, unknown_count: &mut usize) -> String {
    let name = [
        fields.get("BOARD_PRODUCT_NAME"),
        fields.get("PRODUCT_PRODUCT_NAME"),
    ]
    .into_iter()
    .flatten()
    .find(|name| !name.is_empty());

    match name {
        Some(name) => sanitize(name),
        None => {
            let name = format!("UNKNOWN{unknown_count}");
            *unknown_count += 1;
            name
        }
    }
}

/// Object paths allow `[A-Za-z0-9_]`; everything else becomes `_`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
