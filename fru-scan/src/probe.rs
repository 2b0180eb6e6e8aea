// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Sweeping one I2C bus for FRU EEPROMs.

use crate::i2c::SmbusDevice;
use crate::i2c::I2C_SMBUS_BLOCK_MAX;
use crate::DeviceAddress;
use crate::DeviceMap;
use fru_format::FruArea;
use fru_format::HEADER_LEN;
use slog::debug;
use slog::warn;
use slog::Logger;
use std::io;

/// The sweep covers the same range `i2cdetect` does by default.
pub const FIRST_PROBE_ADDRESS: DeviceAddress = 0x03;
pub const LAST_PROBE_ADDRESS: DeviceAddress = 0x77;

/// How a device's internal address pointer is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddrWidth {
    Eight,
    Sixteen,
}

/// Probe every address in the sweep range and collect the FRU images found.
///
/// Individual address failures are logged (or, for an empty probe, ignored)
/// and never abort the rest of the bus. The caller bounds this whole sweep
/// with a wall-clock timeout; nothing here enforces one.
pub fn scan_bus<D: SmbusDevice>(log: &Logger, dev: &mut D) -> DeviceMap {
    let mut devices = DeviceMap::new();

    for address in FIRST_PROBE_ADDRESS..=LAST_PROBE_ADDRESS {
        if let Err(err) = dev.set_slave(address) {
            warn!(
                log, "device busy";
                "address" => address,
                "err" => %err,
            );
            continue;
        }

        // A bare receive-byte is the presence probe; failure just means
        // nothing is listening at this address.
        if dev.receive_byte().is_err() {
            continue;
        }

        match read_device(dev) {
            Ok(Some(image)) => {
                debug!(
                    log, "found FRU device";
                    "address" => address,
                    "bytes" => image.len(),
                );
                devices.insert(address, image);
            }
            // Something answered but it isn't carrying a FRU header.
            Ok(None) => {}
            Err(err) => {
                warn!(
                    log, "failed to read device";
                    "address" => address,
                    "err" => %err,
                );
            }
        }
    }

    devices
}

/// Read the full FRU image from the currently selected device: the common
/// header plus every area the header advertises. `None` if the header does
/// not validate.
fn read_device<D: SmbusDevice>(dev: &mut D) -> io::Result<Option<Vec<u8>>> {
    let width = classify_width(dev)?;

    let mut header = [0u8; HEADER_LEN];
    read_at(dev, width, 0, &mut header)?;
    if !fru_format::validate_header(&header) {
        return Ok(None);
    }

    let mut image = header.to_vec();
    for area in FruArea::ALL {
        let offset_byte = header[area.header_index()];
        // The offset byte travels in a signed-byte domain; values above 0x7f
        // are treated as absent, capping area offsets at 1016 bytes.
        if offset_byte == 0 || offset_byte > 0x7f {
            continue;
        }

        let mut offset = u16::from(offset_byte) * 8;
        let mut area_header = [0u8; 8];
        read_at(dev, width, offset, &mut area_header)?;
        image.extend_from_slice(&area_header);
        offset += 8;

        // The area length byte counts 8-byte units, header included.
        let mut remaining = usize::from(area_header[1]) * 8;
        remaining = remaining.saturating_sub(8);
        while remaining > 0 {
            let chunk = remaining.min(I2C_SMBUS_BLOCK_MAX);
            let mut buf = [0u8; I2C_SMBUS_BLOCK_MAX];
            read_at(dev, width, offset, &mut buf[..chunk])?;
            image.extend_from_slice(&buf[..chunk]);
            offset += chunk as u16;
            remaining -= chunk;
        }
    }

    Ok(Some(image))
}

/// Distinguish 8-bit from 16-bit addressable EEPROMs.
///
/// Reading byte 0 repeatedly returns the same byte from an 8-bit part; a
/// 16-bit part auto-increments its pointer and returns successive bytes.
fn classify_width<D: SmbusDevice>(dev: &mut D) -> io::Result<AddrWidth> {
    if cfg!(feature = "eeprom-16bit") {
        return Ok(AddrWidth::Sixteen);
    }

    let first = dev.read_byte_data(0)?;
    for _ in 0..7 {
        if dev.read_byte_data(0)? != first {
            return Ok(AddrWidth::Sixteen);
        }
    }
    Ok(AddrWidth::Eight)
}

/// Read `buf.len()` bytes starting at `offset`, in one block transaction.
fn read_at<D: SmbusDevice>(
    dev: &mut D,
    width: AddrWidth,
    offset: u16,
    buf: &mut [u8],
) -> io::Result<()> {
    let low = offset as u8;
    let high = (offset >> 8) as u8;

    match width {
        AddrWidth::Eight => dev.read_block_data(low, buf),
        AddrWidth::Sixteen if cfg!(feature = "eeprom-16bit") => {
            // Two-byte pointer write, then the payload one byte at a time.
            dev.write_byte_data(high, low)?;
            for slot in buf.iter_mut() {
                *slot = dev.receive_byte()?;
            }
            Ok(())
        }
        AddrWidth::Sixteen => {
            // Point the device at the low byte first; the block read's
            // command byte supplies the high byte.
            dev.write_byte_data(0, low)?;
            dev.read_block_data(high, buf)
        }
    }
}
