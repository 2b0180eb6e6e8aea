// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Decoding a raw FRU image into a string field map.

use crate::date::manufacture_date;
use crate::FieldMap;
use crate::FruArea;
use crate::FIELD_TERMINATOR;
use crate::HEADER_LEN;
use slog::warn;
use slog::Logger;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("image too short ({0} bytes)")]
    TooShort(usize),
    #[error("{area} area starts past the end of the image")]
    AreaOutOfRange { area: FruArea },
    #[error("{area} area truncated")]
    TruncatedArea { area: FruArea },
}

/// Decode a FRU image into its field map.
///
/// The caller is expected to have validated the common header already (the
/// scan path only keeps images whose header checks out); decoding trusts the
/// area offsets but never reads out of bounds.
pub fn decode(log: &Logger, raw: &[u8]) -> Result<FieldMap, DecodeError> {
    if raw.len() <= HEADER_LEN {
        return Err(DecodeError::TooShort(raw.len()));
    }

    let mut fields = FieldMap::new();
    fields.insert("Common_Format_Version".to_string(), raw[0].to_string());

    for area in FruArea::ALL {
        let offset = usize::from(raw[area.header_index()]) * 8;
        if offset <= 1 {
            continue;
        }
        decode_area(log, raw, area, offset, &mut fields)?;
    }

    Ok(fields)
}

fn decode_area(
    log: &Logger,
    raw: &[u8],
    area: FruArea,
    offset: usize,
    fields: &mut FieldMap,
) -> Result<(), DecodeError> {
    // Skip the area format byte and the area length byte.
    let mut pos = offset + 2;
    if pos >= raw.len() {
        return Err(DecodeError::AreaOutOfRange { area });
    }

    // Each decodable area starts with a short fixed preamble ahead of its
    // type/length field list.
    match area {
        FruArea::Internal | FruArea::MultiRecord => return Ok(()),
        FruArea::Chassis => {
            fields.insert("CHASSIS_TYPE".to_string(), raw[pos].to_string());
            pos += 1;
        }
        FruArea::Board => {
            fields.insert(
                "BOARD_LANGUAGE_CODE".to_string(),
                raw[pos].to_string(),
            );
            pos += 1;
            let minutes = raw
                .get(pos..pos + 3)
                .ok_or(DecodeError::TruncatedArea { area })?;
            let minutes = u32::from(minutes[0])
                | u32::from(minutes[1]) << 8
                | u32::from(minutes[2]) << 16;
            fields.insert(
                "BOARD_MANUFACTURE_DATE".to_string(),
                manufacture_date(minutes),
            );
            pos += 3;
        }
        FruArea::Product => {
            fields.insert(
                "PRODUCT_LANGUAGE_CODE".to_string(),
                raw[pos].to_string(),
            );
            pos += 1;
        }
    }

    let names = area.field_names();
    for (index, name) in names.iter().enumerate() {
        let type_length =
            *raw.get(pos).ok_or(DecodeError::TruncatedArea { area })?;
        if type_length == FIELD_TERMINATOR {
            break;
        }

        let len = usize::from(type_length & 0x3f);
        pos += 1;
        if pos >= raw.len() {
            return Err(DecodeError::TruncatedArea { area });
        }

        let Some(mut value) = raw.get(pos..pos + len) else {
            warn!(
                log, "FRU length mismatch";
                "area" => %area,
                "field" => *name,
            );
            return Err(DecodeError::TruncatedArea { area });
        };

        // Fixed-width writers pad short values with NULs.
        while let [head @ .., 0] = value {
            value = head;
        }
        fields.insert(
            format!("{}_{}", area.name(), name),
            String::from_utf8_lossy(value).into_owned(),
        );

        pos += len;
        if pos >= raw.len() {
            // The image ends before this area's terminator byte. Tolerable
            // only once every field in the list has been read; a truncation
            // with fields outstanding fails the decode.
            warn!(
                log, "FRU length mismatch";
                "area" => %area,
                "field" => *name,
            );
            if index + 1 == names.len() {
                break;
            }
            return Err(DecodeError::TruncatedArea { area });
        }
    }

    Ok(())
}
