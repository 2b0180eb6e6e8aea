// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The bus blacklist file.
//!
//! Operators can exclude buses from scanning with a small JSON document,
//! `{ "buses": [3, 7] }`. Buses that time out at runtime join the same set.

use crate::error::BlacklistError;
use crate::BusBlacklist;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;

pub const DEFAULT_BLACKLIST_PATH: &str = "/etc/fru/blacklist.json";

// Unknown fields are tolerated so the format can grow (address ranges,
// say) without breaking older daemons.
#[derive(Debug, Deserialize)]
struct BlacklistFile {
    #[serde(default)]
    buses: Vec<crate::BusId>,
}

/// Load the blacklist. A missing file yields an empty set; a file that
/// exists but cannot be read or parsed is an error the caller treats as
/// fatal.
pub fn load(path: &Path) -> Result<BusBlacklist, BlacklistError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(BusBlacklist::new());
        }
        Err(err) => {
            return Err(BlacklistError::Read { path: path.to_owned(), err });
        }
    };

    parse(&contents)
        .map_err(|err| BlacklistError::Parse { path: path.to_owned(), err })
}

fn parse(contents: &str) -> Result<BusBlacklist, serde_json::Error> {
    let file: BlacklistFile = serde_json::from_str(contents)?;
    Ok(file.buses.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bus_lists() {
        assert_eq!(parse(r#"{"buses": [3, 7, 3]}"#).unwrap().len(), 2);
        assert!(parse(r#"{"buses": []}"#).unwrap().is_empty());
        assert!(parse(r#"{}"#).unwrap().is_empty());
        // Room for future fields.
        assert_eq!(
            parse(r#"{"buses": [1], "addresses": [80]}"#).unwrap().len(),
            1,
        );
    }

    #[test]
    fn rejects_malformed_documents() {
        // Not JSON at all.
        assert!(parse("not json").is_err());
        // Wrong root type.
        assert!(parse(r#"[1, 2]"#).is_err());
        // `buses` is not an array.
        assert!(parse(r#"{"buses": 5}"#).is_err());
        // Non-integer entries.
        assert!(parse(r#"{"buses": ["3"]}"#).is_err());
        assert!(parse(r#"{"buses": [-1]}"#).is_err());
        assert!(parse(r#"{"buses": [1.5]}"#).is_err());
    }

    #[test]
    fn missing_file_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let set = load(&dir.path().join("blacklist.json")).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn reads_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.json");
        fs::write(&path, r#"{"buses": [11]}"#).unwrap();
        let set = load(&path).unwrap();
        assert!(set.contains(&11));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.json");
        fs::write(&path, r#"{"buses": "all"}"#).unwrap();
        assert!(matches!(
            load(&path),
            Err(BlacklistError::Parse { .. }),
        ));
    }
}
