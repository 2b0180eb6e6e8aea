// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Watching `/dev` for I2C adapters coming and going.

use anyhow::Context;
use fru_scan::FruManager;
use futures::StreamExt;
use inotify::Inotify;
use inotify::WatchMask;
use slog::debug;
use slog::warn;
use slog::Logger;
use std::path::Path;
use std::sync::Arc;

/// Trigger a rescan whenever an `i2c*` node is created, moved in, or
/// deleted under `dev_dir`. Runs until the inotify stream ends.
pub async fn watch_dev(
    dev_dir: &Path,
    manager: Arc<FruManager>,
    log: Logger,
) -> anyhow::Result<()> {
    let inotify = Inotify::init().context("failed to initialize inotify")?;
    inotify
        .watches()
        .add(
            dev_dir,
            WatchMask::CREATE | WatchMask::MOVED_TO | WatchMask::DELETE,
        )
        .with_context(|| format!("failed to watch {}", dev_dir.display()))?;

    let mut stream = inotify
        .into_event_stream(vec![0u8; 4096])
        .context("failed to start inotify event stream")?;

    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                warn!(log, "inotify read error"; "err" => %err);
                continue;
            }
        };
        let Some(name) = event.name else { continue };
        if name.to_string_lossy().starts_with("i2c") {
            debug!(
                log, "i2c device change";
                "name" => %name.to_string_lossy(),
            );
            manager.schedule_rescan().await;
        }
    }

    Ok(())
}
