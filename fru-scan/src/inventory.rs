// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Publishing decoded devices as management-bus objects.

use crate::error::PublishError;
use crate::BusId;
use crate::DeviceAddress;
use async_trait::async_trait;
use fru_format::FieldMap;
use slog::warn;
use slog::Logger;

/// The object-server capability the daemon supplies. The scan loop only
/// knows how to hand over sanitized string properties; the concrete bus
/// binding (and its notion of interfaces and signals) lives with the
/// implementor.
#[async_trait]
pub trait ObjectServer: Send + Sync + 'static {
    /// Publish a device object at `path` carrying `properties` plus the
    /// numeric `BUS` and `ADDRESS` properties.
    async fn publish(
        &self,
        path: &str,
        properties: Vec<(String, String)>,
        bus: BusId,
        address: DeviceAddress,
    ) -> Result<(), PublishError>;

    /// Remove a previously published object.
    async fn unpublish(&self, path: &str) -> Result<(), PublishError>;
}

#[async_trait]
impl<S: ObjectServer> ObjectServer for std::sync::Arc<S> {
    async fn publish(
        &self,
        path: &str,
        properties: Vec<(String, String)>,
        bus: BusId,
        address: DeviceAddress,
    ) -> Result<(), PublishError> {
        (**self).publish(path, properties, bus, address).await
    }

    async fn unpublish(&self, path: &str) -> Result<(), PublishError> {
        (**self).unpublish(path).await
    }
}

/// Prepare decoded fields for publication: scrub keys and values down to
/// the printable-ASCII alphabet, drop empty values, and skip (with a log
/// line) any key that would not survive as a member name.
pub fn prepare_properties(
    log: &Logger,
    fields: &FieldMap,
) -> Vec<(String, String)> {
    let mut properties = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        let value = scrub(value);
        if value.is_empty() {
            continue;
        }
        let key = scrub(key);
        if !legal_key(&key) {
            warn!(log, "illegal key"; "key" => key);
            continue;
        }
        properties.push((key, value));
    }
    properties
}

/// Replace every byte outside `0x01..=0x7f` with `_`.
fn scrub(text: &str) -> String {
    text.bytes()
        .map(|b| if (0x01..=0x7f).contains(&b) { b as char } else { '_' })
        .collect()
}

/// Member names must be non-empty and `[A-Za-z0-9_]` only; ours come from
/// fixed tables, but a registration failure is survivable either way.
fn legal_key(key: &str) -> bool {
    !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
