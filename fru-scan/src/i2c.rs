// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Kernel I2C character devices and the SMBus operations we issue on them.
//!
//! The ioctl interface here is tightly coupled to Linux's `i2c-dev`; the
//! request codes and `#[repr(C)]` structures mirror `<linux/i2c-dev.h>` and
//! `<linux/i2c.h>`.

use crate::error::OpenBusError;
use crate::BusId;
use crate::DeviceAddress;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

const I2C_FUNCS: libc::c_ulong = 0x0705;
const I2C_SLAVE_FORCE: libc::c_ulong = 0x0706;
const I2C_SMBUS: libc::c_ulong = 0x0720;

const I2C_SMBUS_WRITE: u8 = 0;
const I2C_SMBUS_READ: u8 = 1;

const I2C_SMBUS_BYTE: u32 = 1;
const I2C_SMBUS_BYTE_DATA: u32 = 2;
const I2C_SMBUS_I2C_BLOCK_DATA: u32 = 8;

const I2C_FUNC_SMBUS_READ_BYTE: libc::c_ulong = 0x0002_0000;
const I2C_FUNC_SMBUS_READ_I2C_BLOCK: libc::c_ulong = 0x0400_0000;

/// Largest payload of a single SMBus block transaction.
pub const I2C_SMBUS_BLOCK_MAX: usize = 32;

#[repr(C)]
union I2cSmbusData {
    byte: u8,
    word: u16,
    // Count byte, payload, and one spare for PEC.
    block: [u8; I2C_SMBUS_BLOCK_MAX + 2],
}

#[repr(C)]
struct I2cSmbusIoctlData {
    read_write: u8,
    command: u8,
    size: u32,
    data: *mut I2cSmbusData,
}

/// SMBus operations the probe and write paths are built on. Implemented by
/// [`I2cBus`] over the kernel's character devices, and by in-memory fakes
/// in tests.
pub trait SmbusDevice {
    /// Select which slave address subsequent transactions target.
    fn set_slave(&mut self, address: DeviceAddress) -> io::Result<()>;

    /// SMBus receive-byte: a bare one-byte read, used as a presence probe.
    fn receive_byte(&mut self) -> io::Result<u8>;

    /// SMBus read-byte-data.
    fn read_byte_data(&mut self, command: u8) -> io::Result<u8>;

    /// SMBus write-byte-data.
    fn write_byte_data(&mut self, command: u8, value: u8) -> io::Result<()>;

    /// I2C block read of exactly `buf.len()` bytes (at most
    /// [`I2C_SMBUS_BLOCK_MAX`]).
    fn read_block_data(&mut self, command: u8, buf: &mut [u8])
        -> io::Result<()>;
}

/// An open `/dev/i2c-<N>` adapter.
pub struct I2cBus {
    file: File,
    bus: BusId,
}

impl I2cBus {
    /// Open `/dev/i2c-<bus>` read/write with close-on-exec.
    pub fn open(bus: BusId) -> Result<Self, OpenBusError> {
        let path = PathBuf::from(format!("/dev/i2c-{bus}"));
        let file = File::options()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&path)
            .map_err(|err| OpenBusError::Open { path, err })?;
        Ok(Self { file, bus })
    }

    /// Query the adapter functionality mask and confirm both SMBus read
    /// operations scanning depends on are present.
    pub fn require_smbus_reads(&self) -> Result<(), OpenBusError> {
        let mut funcs: libc::c_ulong = 0;
        let rc = unsafe {
            libc::ioctl(self.file.as_raw_fd(), I2C_FUNCS, &mut funcs)
        };
        if rc < 0 {
            return Err(OpenBusError::Funcs {
                bus: self.bus,
                err: io::Error::last_os_error(),
            });
        }

        let required =
            I2C_FUNC_SMBUS_READ_BYTE | I2C_FUNC_SMBUS_READ_I2C_BLOCK;
        if funcs & required != required {
            return Err(OpenBusError::MissingSmbus { bus: self.bus });
        }
        Ok(())
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    fn smbus_access(
        &self,
        read_write: u8,
        command: u8,
        size: u32,
        data: &mut I2cSmbusData,
    ) -> io::Result<()> {
        let mut args = I2cSmbusIoctlData {
            read_write,
            command,
            size,
            data: data as *mut I2cSmbusData,
        };
        let rc = unsafe {
            libc::ioctl(self.file.as_raw_fd(), I2C_SMBUS, &mut args)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl SmbusDevice for I2cBus {
    fn set_slave(&mut self, address: DeviceAddress) -> io::Result<()> {
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                I2C_SLAVE_FORCE,
                libc::c_ulong::from(address),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn receive_byte(&mut self) -> io::Result<u8> {
        let mut data = I2cSmbusData { byte: 0 };
        self.smbus_access(I2C_SMBUS_READ, 0, I2C_SMBUS_BYTE, &mut data)?;
        Ok(unsafe { data.byte })
    }

    fn read_byte_data(&mut self, command: u8) -> io::Result<u8> {
        let mut data = I2cSmbusData { byte: 0 };
        self.smbus_access(
            I2C_SMBUS_READ,
            command,
            I2C_SMBUS_BYTE_DATA,
            &mut data,
        )?;
        Ok(unsafe { data.byte })
    }

    fn write_byte_data(&mut self, command: u8, value: u8) -> io::Result<()> {
        let mut data = I2cSmbusData { byte: value };
        self.smbus_access(
            I2C_SMBUS_WRITE,
            command,
            I2C_SMBUS_BYTE_DATA,
            &mut data,
        )
    }

    fn read_block_data(
        &mut self,
        command: u8,
        buf: &mut [u8],
    ) -> io::Result<()> {
        assert!(buf.len() <= I2C_SMBUS_BLOCK_MAX);

        let mut block = [0u8; I2C_SMBUS_BLOCK_MAX + 2];
        block[0] = buf.len() as u8;
        let mut data = I2cSmbusData { block };
        self.smbus_access(
            I2C_SMBUS_READ,
            command,
            I2C_SMBUS_I2C_BLOCK_DATA,
            &mut data,
        )?;

        let block = unsafe { &data.block };
        let returned = usize::from(block[0]);
        if returned < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "short block read: asked for {}, got {returned}",
                    buf.len(),
                ),
            ));
        }
        buf.copy_from_slice(&block[1..1 + buf.len()]);
        Ok(())
    }
}
