// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Encoding a field map back into a writable FRU image.

use crate::checksum;
use crate::date::manufacture_minutes;
use crate::FieldMap;
use crate::FruArea;
use crate::FIELD_TERMINATOR;
use crate::HEADER_LEN;
use crate::MAX_FRU_SIZE;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("field {key} exceeds the 63-byte type/length limit")]
    FieldTooLong { key: String },
    #[error("{key} is not a decimal byte: {value:?}")]
    BadNumber { key: String, value: String },
    #[error("unparseable manufacture date: {0:?}")]
    BadDate(String),
    #[error("encoded image exceeds {MAX_FRU_SIZE} bytes")]
    ImageTooLarge,
}

/// Encode a field map into a FRU image.
///
/// The inverse of [`crate::decode`] up to representation: a decoded map
/// re-encodes to an image that decodes to the same map. Area field lists are
/// emitted as the contiguous prefix of each area's field table present in
/// the map, which is the only shape decoding can produce.
pub fn encode(fields: &FieldMap) -> Result<Vec<u8>, EncodeError> {
    let mut areas = Vec::new();
    for area in [FruArea::Chassis, FruArea::Board, FruArea::Product] {
        if let Some(bytes) = encode_area(fields, area)? {
            areas.push((area, bytes));
        }
    }

    let total =
        HEADER_LEN + areas.iter().map(|(_, b)| b.len()).sum::<usize>();
    if total > MAX_FRU_SIZE {
        return Err(EncodeError::ImageTooLarge);
    }

    let version = parse_byte(fields, "Common_Format_Version", 1)?;
    let mut image = vec![version, 0, 0, 0, 0, 0, 0, 0];
    let mut next_offset = 1;
    for (area, bytes) in &areas {
        image[area.header_index()] = next_offset as u8;
        next_offset += bytes.len() / 8;
    }
    image[7] = checksum(&image[..7]);
    for (_, bytes) in &areas {
        image.extend_from_slice(bytes);
    }

    Ok(image)
}

fn encode_area(
    fields: &FieldMap,
    area: FruArea,
) -> Result<Option<Vec<u8>>, EncodeError> {
    let preamble_keys: &[&str] = match area {
        FruArea::Chassis => &["CHASSIS_TYPE"],
        FruArea::Board => &["BOARD_LANGUAGE_CODE", "BOARD_MANUFACTURE_DATE"],
        FruArea::Product => &["PRODUCT_LANGUAGE_CODE"],
        FruArea::Internal | FruArea::MultiRecord => return Ok(None),
    };
    let present = preamble_keys.iter().any(|k| fields.contains_key(*k))
        || area
            .field_names()
            .iter()
            .any(|name| fields.contains_key(&area_key(area, name)));
    if !present {
        return Ok(None);
    }

    // Area format version, then a length byte patched in below.
    let mut bytes = vec![0x01, 0x00];
    match area {
        FruArea::Chassis => {
            bytes.push(parse_byte(fields, "CHASSIS_TYPE", 0)?);
        }
        FruArea::Board => {
            bytes.push(parse_byte(fields, "BOARD_LANGUAGE_CODE", 0)?);
            let minutes = match fields.get("BOARD_MANUFACTURE_DATE") {
                Some(date) => manufacture_minutes(date)
                    .ok_or_else(|| EncodeError::BadDate(date.clone()))?,
                None => 0,
            };
            bytes.extend_from_slice(&minutes.to_le_bytes()[..3]);
        }
        FruArea::Product => {
            bytes.push(parse_byte(fields, "PRODUCT_LANGUAGE_CODE", 0)?);
        }
        FruArea::Internal | FruArea::MultiRecord => unreachable!(),
    }

    for name in area.field_names() {
        let key = area_key(area, name);
        let Some(value) = fields.get(&key) else { break };
        let mut data = value.as_bytes().to_vec();
        // A bare one-byte field would collide with the 0xc1 terminator;
        // pad it with a NUL, which decoding strips back off.
        if data.len() == 1 {
            data.push(0);
        }
        if data.len() > 0x3f {
            return Err(EncodeError::FieldTooLong { key });
        }
        bytes.push(0xc0 | data.len() as u8);
        bytes.extend_from_slice(&data);
    }
    bytes.push(FIELD_TERMINATOR);

    // Pad to an 8-byte multiple, with the final byte balancing the area
    // checksum.
    while bytes.len() % 8 != 7 {
        bytes.push(0);
    }
    bytes[1] = ((bytes.len() + 1) / 8) as u8;
    let sum = checksum(&bytes);
    bytes.push(sum);

    Ok(Some(bytes))
}

fn area_key(area: FruArea, name: &str) -> String {
    format!("{}_{}", area.name(), name)
}

fn parse_byte(
    fields: &FieldMap,
    key: &str,
    default: u8,
) -> Result<u8, EncodeError> {
    match fields.get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| EncodeError::BadNumber {
            key: key.to_string(),
            value: value.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;
    use crate::validate_header;
    use slog::Logger;

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn sample_map() -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("Common_Format_Version".into(), "1".into());
        fields.insert("CHASSIS_TYPE".into(), "23".into());
        fields.insert("CHASSIS_PART_NUMBER".into(), "CHAS-100".into());
        fields.insert("CHASSIS_SERIAL_NUMBER".into(), "S".into());
        fields.insert("BOARD_LANGUAGE_CODE".into(), "25".into());
        fields.insert(
            "BOARD_MANUFACTURE_DATE".into(),
            "Mon Jan  1 00:16:00 1996".into(),
        );
        fields.insert("BOARD_MANUFACTURER".into(), "Oxide".into());
        fields.insert("BOARD_PRODUCT_NAME".into(), "Gimlet".into());
        fields.insert("PRODUCT_LANGUAGE_CODE".into(), "0".into());
        fields.insert("PRODUCT_MANUFACTURER".into(), "Oxide".into());
        fields.insert("PRODUCT_PRODUCT_NAME".into(), "Rack Widget".into());
        fields
    }

    #[test]
    fn encodes_valid_header() {
        let image = encode(&sample_map()).unwrap();
        let header: &[u8; 8] = image[..8].try_into().unwrap();
        assert!(validate_header(header));
    }

    #[test]
    fn areas_align_to_eight_bytes() {
        let image = encode(&sample_map()).unwrap();
        assert_eq!(image.len() % 8, 0);
        for area in [FruArea::Chassis, FruArea::Board, FruArea::Product] {
            let offset = usize::from(image[area.header_index()]) * 8;
            assert_ne!(offset, 0);
            // Area format version byte leads every area.
            assert_eq!(image[offset], 0x01);
        }
    }

    #[test]
    fn decode_encode_decode_is_identity() {
        let image = encode(&sample_map()).unwrap();
        let decoded = decode(&log(), &image).unwrap();
        let reencoded = encode(&decoded).unwrap();
        assert_eq!(decode(&log(), &reencoded).unwrap(), decoded);
        assert_eq!(reencoded, image);
    }

    #[test]
    fn one_byte_values_survive_the_terminator_collision() {
        let image = encode(&sample_map()).unwrap();
        let decoded = decode(&log(), &image).unwrap();
        assert_eq!(decoded["CHASSIS_SERIAL_NUMBER"], "S");
    }

    #[test]
    fn rejects_oversized_fields() {
        let mut fields = sample_map();
        fields.insert("BOARD_SERIAL_NUMBER".into(), "x".repeat(64));
        assert_eq!(
            encode(&fields),
            Err(EncodeError::FieldTooLong {
                key: "BOARD_SERIAL_NUMBER".into()
            }),
        );
    }

    #[test]
    fn rejects_oversized_images() {
        let mut fields = FieldMap::new();
        for area in [FruArea::Chassis, FruArea::Board, FruArea::Product] {
            for name in area.field_names() {
                fields.insert(area_key(area, name), "y".repeat(63));
            }
        }
        assert_eq!(encode(&fields), Err(EncodeError::ImageTooLarge));
    }

    #[test]
    fn rejects_garbage_numerics() {
        let mut fields = sample_map();
        fields.insert("CHASSIS_TYPE".into(), "tower".into());
        assert!(matches!(
            encode(&fields),
            Err(EncodeError::BadNumber { .. }),
        ));
    }

    #[test]
    fn empty_map_yields_bare_header() {
        let image = encode(&FieldMap::new()).unwrap();
        assert_eq!(image.len(), 8);
        let header: &[u8; 8] = image[..8].try_into().unwrap();
        assert!(validate_header(header));
    }
}
