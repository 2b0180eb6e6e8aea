// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! FRU EEPROM discovery daemon.
//!
//! Scans the host's I2C segments for FRU EEPROMs and publishes the decoded
//! inventory on the system management bus. Rescans run on request, when
//! `/dev` gains or loses an i2c node, after a successful write-back, and on
//! chassis power transitions.

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use fru_scan::FruManager;
use fru_scan::ScanConfig;
use slog::info;
use slog::o;
use slog::Drain;
use slog::Level;
use slog::Logger;
use std::future::pending;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod dbus;
mod watch;

/// Daemon that discovers FRU EEPROMs and publishes their contents.
#[derive(Parser, Debug)]
struct Args {
    #[clap(
        short,
        long,
        default_value = "info",
        value_parser = level_from_str,
        help = "Log level",
    )]
    log_level: Level,

    /// Bus blacklist document; missing is fine, malformed is fatal.
    #[clap(long, default_value = fru_scan::blacklist::DEFAULT_BLACKLIST_PATH)]
    blacklist: PathBuf,

    /// Backing file for the synthetic baseboard FRU.
    #[clap(long, default_value = fru_scan::baseboard::DEFAULT_BASEBOARD_PATH)]
    baseboard: PathBuf,

    /// Quiet period (in milliseconds) between a rescan trigger and the
    /// scan cycle it starts.
    #[clap(long, default_value = "1000")]
    debounce_millis: u64,

    /// Wall-clock budget (in seconds) for probing a single bus.
    #[clap(long, default_value = "5")]
    probe_timeout_secs: u64,
}

fn level_from_str(s: &str) -> Result<Level> {
    if let Ok(level) = s.parse() {
        Ok(level)
    } else {
        bail!(format!("Invalid log level: {}", s))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator)
        .build()
        .filter_level(args.log_level)
        .fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let log = Logger::root(drain, o!("component" => "frud"));

    let blacklist = fru_scan::blacklist::load(&args.blacklist)
        .context("failed to load bus blacklist")?;
    if !blacklist.is_empty() {
        info!(log, "loaded bus blacklist"; "buses" => ?blacklist);
    }

    let config = ScanConfig {
        baseboard_path: args.baseboard,
        debounce: Duration::from_millis(args.debounce_millis),
        probe_timeout: Duration::from_secs(args.probe_timeout_secs),
        ..ScanConfig::default()
    };
    let dev_dir = config.dev_dir.clone();

    let connection = zbus::connection::Builder::system()
        .context("failed to configure system bus connection")?
        .name(dbus::SERVICE_NAME)
        .context("failed to claim service name")?
        .build()
        .await
        .context("failed to connect to system bus")?;

    // Spawning the manager also schedules the startup scan.
    let manager = Arc::new(FruManager::new(
        config,
        blacklist,
        dbus::DbusObjectServer::new(connection.clone()),
        &log,
    ));

    connection
        .object_server()
        .at(dbus::MANAGER_PATH, dbus::ManagerInterface::new(Arc::clone(&manager)))
        .await
        .context("failed to serve manager object")?;

    {
        let manager = Arc::clone(&manager);
        let log = log.new(o!("component" => "dev-watch"));
        tokio::spawn(async move {
            if let Err(err) = watch::watch_dev(&dev_dir, manager, log.clone()).await
            {
                slog::error!(log, "device watch failed"; "err" => %err);
            }
        });
    }

    {
        let manager = Arc::clone(&manager);
        let connection = connection.clone();
        let log = log.new(o!("component" => "power-watch"));
        tokio::spawn(async move {
            if let Err(err) =
                dbus::watch_power_state(&connection, manager, log.clone())
                    .await
            {
                slog::error!(log, "power watch failed"; "err" => %err);
            }
        });
    }

    info!(log, "started"; "service" => dbus::SERVICE_NAME);
    pending::<()>().await;

    Ok(())
}
