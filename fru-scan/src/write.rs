// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Programming a FRU image back into an EEPROM.

use crate::baseboard;
use crate::error::WriteError;
use crate::i2c::I2cBus;
use crate::i2c::SmbusDevice;
use crate::BusId;
use crate::DeviceAddress;
use crate::BASEBOARD_ADDRESS;
use crate::BASEBOARD_BUS;
use fru_format::MAX_FRU_SIZE;
use slog::info;
use slog::Logger;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;

/// EEPROMs commonly page at 256 bytes; 4K parts select the page with the
/// low bit of the device address.
const EEPROM_PAGE_SIZE: usize = 256;

/// Settle time between write transactions; most parts need 5-10 ms.
const WRITE_SETTLE: Duration = Duration::from_millis(10);

/// Retries per byte before the write fails.
const WRITE_RETRIES: u32 = 2;

/// Validate `data` and write it to `(bus, address)`.
///
/// The baseboard pseudo-device is a file replace; everything else is
/// programmed over SMBus. A successful hardware write leaves the EEPROM
/// holding exactly `data`, so the caller reschedules a scan afterwards.
pub async fn write_fru(
    log: &Logger,
    baseboard_path: &Path,
    bus: BusId,
    address: DeviceAddress,
    data: &[u8],
) -> Result<(), WriteError> {
    if data.len() > MAX_FRU_SIZE {
        return Err(WriteError::TooLarge);
    }
    // Run the image through the decoder; we never program bytes we cannot
    // read back as a FRU.
    fru_format::decode(log, data).map_err(WriteError::InvalidImage)?;

    if (bus, address) == (BASEBOARD_BUS, BASEBOARD_ADDRESS) {
        return baseboard::write(baseboard_path, data)
            .map_err(WriteError::Baseboard);
    }

    let mut dev = I2cBus::open(bus)?;
    write_eeprom(&mut dev, address, data).await?;
    info!(
        log, "programmed FRU EEPROM";
        "bus" => bus,
        "address" => address,
        "bytes" => data.len(),
    );
    Ok(())
}

/// Program `image` one byte per write-byte-data transaction, sleeping the
/// settle time after every attempt. Each 256-byte page boundary bumps the
/// slave address by one and re-selects before writing continues at offset
/// 0 of the new page.
pub(crate) async fn write_eeprom<D: SmbusDevice>(
    dev: &mut D,
    mut address: DeviceAddress,
    image: &[u8],
) -> Result<(), WriteError> {
    dev.set_slave(address)
        .map_err(|err| WriteError::SelectSlave { address, err })?;

    let mut index = 0;
    let mut retries = WRITE_RETRIES;
    while index < image.len() {
        // Only advance the page on a fresh attempt; a retry of the first
        // byte of a page must not advance twice.
        if index > 0
            && index % EEPROM_PAGE_SIZE == 0
            && retries == WRITE_RETRIES
        {
            address += 1;
            dev.set_slave(address)
                .map_err(|err| WriteError::SelectSlave { address, err })?;
        }

        match dev.write_byte_data(index as u8, image[index]) {
            Ok(()) => {
                retries = WRITE_RETRIES;
                index += 1;
            }
            Err(err) => {
                if retries == 0 {
                    return Err(WriteError::WriteByte { index, err });
                }
                retries -= 1;
            }
        }

        sleep(WRITE_SETTLE).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake::FakeBus;
    use crate::probe::fake::FakeEeprom;
    use crate::probe::fake::FakeWidth;

    fn bus_with_blank_eeprom(size: usize) -> FakeBus {
        FakeBus::new()
            .with_device(0x50, FakeEeprom::new(FakeWidth::Eight, vec![0; size]))
            .with_device(0x51, FakeEeprom::new(FakeWidth::Eight, vec![0; size]))
    }

    #[tokio::test(start_paused = true)]
    async fn crosses_page_boundary_by_bumping_the_slave_address() {
        let mut bus = bus_with_blank_eeprom(512);
        let image: Vec<u8> = (0..300u16).map(|i| i as u8).collect();

        write_eeprom(&mut bus, 0x50, &image).await.unwrap();

        // One re-select at the 256-byte boundary.
        assert_eq!(bus.selections, vec![0x50, 0x51]);

        // The first page landed on 0x50, and byte 256 restarted at command
        // 0 on 0x51.
        let first = &bus.devices[&0x50];
        assert_eq!(first.writes.len(), 256);
        assert_eq!(first.writes[0], (0, 0));
        assert_eq!(first.writes[255], (255, 255));

        let second = &bus.devices[&0x51];
        assert_eq!(second.writes.len(), 300 - 256);
        assert_eq!(second.writes[0], (0, 0));
        assert_eq!(second.mem[..44], image[256..]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_write_failures() {
        let mut bus = bus_with_blank_eeprom(64);
        // Two failures at index 5, inside the retry budget.
        bus.devices.get_mut(&0x50).unwrap().fail_writes = vec![5, 5];
        let image = vec![0xab; 16];

        write_eeprom(&mut bus, 0x50, &image).await.unwrap();
        assert_eq!(bus.devices[&0x50].mem[..16], image[..]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_exhausting_retries() {
        let mut bus = bus_with_blank_eeprom(64);
        bus.devices.get_mut(&0x50).unwrap().fail_writes = vec![5, 5, 5];
        let image = vec![0xab; 16];

        let err = write_eeprom(&mut bus, 0x50, &image).await.unwrap_err();
        assert!(matches!(err, WriteError::WriteByte { index: 5, .. }));
    }
}
