// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPMI Platform Management FRU Information Storage format.
//!
//! This crate implements the binary layout carried by FRU EEPROMs: an 8-byte
//! common header followed by up to five checksummed areas of type/length
//! encoded fields. It knows nothing about how the bytes were obtained; it only
//! converts between raw images and string field maps.

use std::collections::BTreeMap;
use std::fmt;

mod date;
mod decode;
mod encode;

pub use date::manufacture_date;
pub use date::manufacture_minutes;
pub use decode::decode;
pub use decode::DecodeError;
pub use encode::encode;
pub use encode::EncodeError;

/// Size of the common header at the front of every FRU image.
pub const HEADER_LEN: usize = 8;

/// Largest FRU image we accept, matching the largest EEPROM we program.
pub const MAX_FRU_SIZE: usize = 512;

/// Type/length byte marking the end of an area's field list.
pub const FIELD_TERMINATOR: u8 = 0xc1;

/// Decoded FRU contents: `<AREA>_<FIELD>` keys plus a handful of fixed
/// metadata keys (`Common_Format_Version`, `CHASSIS_TYPE`, ...).
pub type FieldMap = BTreeMap<String, String>;

/// The five FRU areas, in the order their offsets appear in the common
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FruArea {
    Internal,
    Chassis,
    Board,
    Product,
    MultiRecord,
}

impl FruArea {
    pub const ALL: [FruArea; 5] = [
        FruArea::Internal,
        FruArea::Chassis,
        FruArea::Board,
        FruArea::Product,
        FruArea::MultiRecord,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FruArea::Internal => "INTERNAL",
            FruArea::Chassis => "CHASSIS",
            FruArea::Board => "BOARD",
            FruArea::Product => "PRODUCT",
            FruArea::MultiRecord => "MULTIRECORD",
        }
    }

    /// Index of this area's offset byte within the common header.
    pub fn header_index(self) -> usize {
        match self {
            FruArea::Internal => 1,
            FruArea::Chassis => 2,
            FruArea::Board => 3,
            FruArea::Product => 4,
            FruArea::MultiRecord => 5,
        }
    }

    /// Names of the type/length fields this area carries, in wire order.
    /// Internal-use and multirecord areas carry none that we decode.
    pub fn field_names(self) -> &'static [&'static str] {
        match self {
            FruArea::Chassis => {
                &["PART_NUMBER", "SERIAL_NUMBER", "INFO_AM1", "INFO_AM2"]
            }
            FruArea::Board => &[
                "MANUFACTURER",
                "PRODUCT_NAME",
                "SERIAL_NUMBER",
                "PART_NUMBER",
                "FRU_VERSION_ID",
                "INFO_AM1",
                "INFO_AM2",
            ],
            FruArea::Product => &[
                "MANUFACTURER",
                "PRODUCT_NAME",
                "PART_NUMBER",
                "VERSION",
                "SERIAL_NUMBER",
                "ASSET_TAG",
                "FRU_VERSION_ID",
                "INFO_AM1",
                "INFO_AM2",
            ],
            FruArea::Internal | FruArea::MultiRecord => &[],
        }
    }
}

impl fmt::Display for FruArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Zero-sum checksum over `bytes`: the byte that makes the total wrap to 0.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b)).wrapping_neg()
}

/// Validate the 8-byte common header.
///
/// Accepts iff the format version is 1, the pad byte is 0, the non-zero area
/// offsets are pairwise distinct, and the checksum byte balances the sum of
/// the first seven bytes.
pub fn validate_header(header: &[u8; HEADER_LEN]) -> bool {
    if header[0] != 1 {
        return false;
    }
    if header[6] != 0 {
        return false;
    }

    // Two areas may not share an offset.
    let offsets = &header[1..6];
    for (i, offset) in offsets.iter().enumerate() {
        if *offset == 0 {
            continue;
        }
        if offsets[..i].contains(offset) {
            return false;
        }
    }

    checksum(&header[..7]) == header[7]
}

/// The write path accepts an image iff it fits the largest EEPROM we program
/// and survives a full decode.
pub fn validate_image(log: &slog::Logger, image: &[u8]) -> bool {
    image.len() <= MAX_FRU_SIZE && decode(log, image).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with_checksum(mut header: [u8; 8]) -> [u8; 8] {
        header[7] = checksum(&header[..7]);
        header
    }

    #[test]
    fn header_happy_path() {
        // Sum of the first seven bytes is 0x104, so the balancing checksum
        // byte is 0xfc.
        let header = [0x01, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0xfc];
        assert_eq!(checksum(&header[..7]), 0xfc);
        assert!(validate_header(&header));
    }

    #[test]
    fn header_rejects_duplicate_offsets() {
        // Chassis and board areas both claim offset 1; invalid no matter
        // what the checksum byte says.
        for csum in 0..=u8::MAX {
            let header = [0x01, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, csum];
            assert!(!validate_header(&header));
        }
    }

    #[test]
    fn header_allows_duplicate_zero_offsets() {
        let header =
            header_with_checksum([0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0]);
        assert!(validate_header(&header));
    }

    #[test]
    fn header_rejects_bad_version() {
        let header =
            header_with_checksum([0x02, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0]);
        assert!(!validate_header(&header));
    }

    #[test]
    fn header_rejects_nonzero_pad() {
        let header =
            header_with_checksum([0x01, 0x00, 0x01, 0x02, 0x00, 0x00, 0x01, 0]);
        assert!(!validate_header(&header));
    }

    #[test]
    fn header_rejects_bad_checksum() {
        let header = [0x01, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0xfd];
        assert!(!validate_header(&header));
    }

    #[test]
    fn image_validation_is_decode_plus_size() {
        let log = slog::Logger::root(slog::Discard, slog::o!());

        let mut fields = FieldMap::new();
        fields.insert("BOARD_LANGUAGE_CODE".into(), "0".into());
        fields.insert("BOARD_MANUFACTURER".into(), "Oxide".into());
        let image = encode(&fields).unwrap();
        assert!(validate_image(&log, &image));

        assert!(!validate_image(&log, &[0u8; 8]));
        assert!(!validate_image(&log, &[0xde; 40]));
        assert!(!validate_image(&log, &vec![0u8; MAX_FRU_SIZE + 1]));
    }
}
