// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The synthetic baseboard FRU, sourced from a file instead of live I2C.

use fru_format::HEADER_LEN;
use slog::debug;
use slog::warn;
use slog::Logger;
use std::fs;
use std::io;
use std::path::Path;

pub const DEFAULT_BASEBOARD_PATH: &str = "/etc/fru/baseboard.fru.bin";

/// Read the baseboard image. `None` when the file is missing or unreadable
/// (the baseboard is optional) and when its header does not validate, since
/// the inventory only ever holds header-validated images.
pub fn read(log: &Logger, path: &Path) -> Option<Vec<u8>> {
    let image = match fs::read(path) {
        Ok(image) => image,
        Err(err) => {
            debug!(
                log, "no baseboard FRU";
                "path" => %path.display(),
                "err" => %err,
            );
            return None;
        }
    };

    let header: Option<&[u8; HEADER_LEN]> =
        image.get(..HEADER_LEN).and_then(|h| h.try_into().ok());
    match header {
        Some(header) if fru_format::validate_header(header) => Some(image),
        _ => {
            warn!(
                log, "baseboard FRU has an invalid header";
                "path" => %path.display(),
            );
            None
        }
    }
}

/// Atomically replace the baseboard image: write a sibling temporary file,
/// then rename it into place.
pub fn write(path: &Path, image: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("new");
    fs::write(&tmp, image)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fru_format::FieldMap;

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn sample_image() -> Vec<u8> {
        let mut fields = FieldMap::new();
        fields.insert("BOARD_LANGUAGE_CODE".into(), "0".into());
        fields.insert("BOARD_MANUFACTURER".into(), "Oxide".into());
        fru_format::encode(&fields).unwrap()
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(&log(), &dir.path().join("baseboard.fru.bin")).is_none());
    }

    #[test]
    fn bad_header_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseboard.fru.bin");
        fs::write(&path, [0xde; 32]).unwrap();
        assert!(read(&log(), &path).is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseboard.fru.bin");
        let image = sample_image();
        write(&path, &image).unwrap();
        assert_eq!(read(&log(), &path), Some(image));
    }

    #[test]
    fn write_replaces_existing_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseboard.fru.bin");
        fs::write(&path, [0u8; 100]).unwrap();
        let image = sample_image();
        write(&path, &image).unwrap();
        assert_eq!(fs::read(&path).unwrap(), image);
    }
}
