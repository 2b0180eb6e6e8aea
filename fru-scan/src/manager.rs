// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The scan manager: a handle plus a background task that owns every piece
//! of mutable scan state and serializes rescans behind a debounce timer.

use crate::baseboard;
use crate::dedup;
use crate::dedup::Placement;
use crate::dedup::PublishedObject;
use crate::error::InventoryError;
use crate::error::WriteError;
use crate::i2c::I2cBus;
use crate::inventory;
use crate::inventory::ObjectServer;
use crate::probe;
use crate::write;
use crate::BusBlacklist;
use crate::BusId;
use crate::BusInventory;
use crate::DeviceAddress;
use crate::DeviceMap;
use crate::BASEBOARD_ADDRESS;
use crate::BASEBOARD_BUS;
use slog::debug;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;
use tokio::time::timeout;
use tokio::time::Instant;

/// Configuration of the scan loop. The defaults are the production paths
/// and timings; tests point `dev_dir` and `baseboard_path` elsewhere and
/// shrink the timers.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Directory enumerated for `i2c-<N>` character devices.
    pub dev_dir: PathBuf,

    /// Backing file for the synthetic baseboard device at `(0, 0)`.
    pub baseboard_path: PathBuf,

    /// Quiet period between a trigger and the scan cycle it starts.
    pub debounce: Duration,

    /// Wall-clock budget for probing a single bus; a bus that exceeds it
    /// is blacklisted for the life of the process.
    pub probe_timeout: Duration,

    /// Whether a bus is a mux child. Swappable so tests don't need sysfs.
    pub mux_check: fn(BusId) -> bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            dev_dir: PathBuf::from("/dev"),
            baseboard_path: PathBuf::from(baseboard::DEFAULT_BASEBOARD_PATH),
            debounce: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
            mux_check: dedup::is_mux_child,
        }
    }
}

/// Handle to the manager task.
///
/// Dropping the handle aborts the task and everything it owns.
#[derive(Debug)]
pub struct FruManager {
    cmds_tx: mpsc::Sender<Command>,
    inner_task: JoinHandle<()>,
}

impl Drop for FruManager {
    fn drop(&mut self) {
        self.inner_task.abort();
    }
}

#[derive(Debug)]
enum Command {
    Rescan,
    GetRawFru {
        bus: BusId,
        address: DeviceAddress,
        response_tx: oneshot::Sender<Result<Vec<u8>, InventoryError>>,
    },
    WriteFru {
        bus: BusId,
        address: DeviceAddress,
        data: Vec<u8>,
        response_tx: oneshot::Sender<Result<(), WriteError>>,
    },
}

impl FruManager {
    /// Spawn the manager task. Startup counts as a rescan trigger, so the
    /// first scan cycle runs one debounce interval after this returns.
    pub fn new<S: ObjectServer>(
        config: ScanConfig,
        blacklist: BusBlacklist,
        objects: S,
        log: &Logger,
    ) -> Self {
        // The channel is small on purpose: rescan triggers coalesce, and
        // lookups and writes are serialized against scans anyway.
        let (cmds_tx, cmds_rx) = mpsc::channel(8);

        let inner = Inner {
            config,
            blacklist,
            objects,
            cmds_rx,
            inventory: BusInventory::new(),
            published: BTreeMap::new(),
            unknown_count: 0,
            log: log.new(o!("component" => "fru-manager")),
        };
        let inner_task = tokio::spawn(inner.run());

        Self { cmds_tx, inner_task }
    }

    /// Request a rescan. Triggers are debounced; any number arriving inside
    /// the quiet period (or during a running cycle) produce one cycle.
    pub async fn schedule_rescan(&self) {
        // `Inner::run()` doesn't exit until we are dropped, so unwrapping
        // here only panics if it itself panicked.
        self.cmds_tx.send(Command::Rescan).await.unwrap();
    }

    /// Fetch the raw image the last scan found at `(bus, address)`.
    pub async fn raw_fru(
        &self,
        bus: BusId,
        address: DeviceAddress,
    ) -> Result<Vec<u8>, InventoryError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.cmds_tx
            .send(Command::GetRawFru { bus, address, response_tx })
            .await
            .unwrap();
        response_rx.await.unwrap()
    }

    /// Write an image to `(bus, address)` and, on success, schedule the
    /// rescan that makes it visible.
    pub async fn write_fru(
        &self,
        bus: BusId,
        address: DeviceAddress,
        data: Vec<u8>,
    ) -> Result<(), WriteError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.cmds_tx
            .send(Command::WriteFru { bus, address, data, response_tx })
            .await
            .unwrap();
        response_rx.await.unwrap()
    }
}

struct Inner<S> {
    config: ScanConfig,
    blacklist: BusBlacklist,
    objects: S,
    cmds_rx: mpsc::Receiver<Command>,
    inventory: BusInventory,
    published: BTreeMap<(BusId, DeviceAddress), PublishedObject>,
    unknown_count: usize,
    log: Logger,
}

impl<S: ObjectServer> Inner<S> {
    async fn run(mut self) {
        // Startup is an implicit trigger.
        let debounce = time::sleep(self.config.debounce);
        tokio::pin!(debounce);
        let mut armed = true;

        loop {
            tokio::select! {
                _ = &mut debounce, if armed => {
                    armed = false;
                    self.scan_cycle().await;
                }

                cmd = self.cmds_rx.recv() => {
                    // `None` means every handle is gone; nothing left to do.
                    let Some(cmd) = cmd else { return };
                    match cmd {
                        Command::Rescan => {
                            debounce.as_mut().reset(
                                Instant::now() + self.config.debounce,
                            );
                            armed = true;
                        }
                        Command::GetRawFru { bus, address, response_tx } => {
                            let _ =
                                response_tx.send(self.raw_fru(bus, address));
                        }
                        Command::WriteFru {
                            bus,
                            address,
                            data,
                            response_tx,
                        } => {
                            let result = write::write_fru(
                                &self.log,
                                &self.config.baseboard_path,
                                bus,
                                address,
                                &data,
                            )
                            .await;
                            if result.is_ok() {
                                debounce.as_mut().reset(
                                    Instant::now() + self.config.debounce,
                                );
                                armed = true;
                            }
                            let _ = response_tx.send(result);
                        }
                    }
                }
            }
        }
    }

    fn raw_fru(
        &self,
        bus: BusId,
        address: DeviceAddress,
    ) -> Result<Vec<u8>, InventoryError> {
        let devices =
            self.inventory.get(&bus).ok_or(InventoryError::InvalidBus)?;
        devices
            .get(&address)
            .cloned()
            .ok_or(InventoryError::InvalidAddress)
    }

    /// One full scan cycle: probe every eligible bus, then rebuild the
    /// published object set from scratch.
    async fn scan_cycle(&mut self) {
        info!(self.log, "starting scan cycle");

        let buses = enumerate_buses(&self.log, &self.config.dev_dir);
        self.inventory.clear();

        for bus in buses {
            if self.blacklist.contains(&bus) {
                debug!(self.log, "skipping blacklisted bus"; "bus" => bus);
                continue;
            }
            if let Some(devices) = self.probe_bus(bus).await {
                if !devices.is_empty() {
                    self.inventory.insert(bus, devices);
                }
            }
        }

        // Tear down last cycle's objects; scans rebuild the world.
        for (_, object) in std::mem::take(&mut self.published) {
            if let Err(err) = self.objects.unpublish(&object.path).await {
                warn!(
                    self.log, "failed to remove object";
                    "path" => %object.path,
                    "err" => %err,
                );
            }
        }
        self.unknown_count = 0;

        if let Some(image) =
            baseboard::read(&self.log, &self.config.baseboard_path)
        {
            self.inventory
                .entry(BASEBOARD_BUS)
                .or_insert_with(DeviceMap::new)
                .insert(BASEBOARD_ADDRESS, image);
        }

        // Publish in (bus, address) order so a mux parent always lands
        // before its children show up as duplicates.
        let inventory = self.inventory.clone();
        for (&bus, devices) in &inventory {
            for (&address, raw) in devices {
                self.publish_device(bus, address, raw, &inventory).await;
            }
        }

        info!(
            self.log, "scan cycle complete";
            "buses" => inventory.len(),
            "objects" => self.published.len(),
        );
    }

    /// Probe one bus under the wall-clock budget. `None` means the bus
    /// contributed nothing this cycle (unopenable, no SMBus, or timed out).
    async fn probe_bus(&mut self, bus: BusId) -> Option<DeviceMap> {
        let dev = match I2cBus::open(bus) {
            Ok(dev) => dev,
            Err(err) => {
                warn!(self.log, "unable to open bus"; "err" => %err);
                return None;
            }
        };
        if let Err(err) = dev.require_smbus_reads() {
            warn!(self.log, "skipping bus"; "err" => %err);
            return None;
        }

        let log = self.log.new(o!("bus" => bus));
        let mut dev = dev;
        let worker = tokio::task::spawn_blocking(move || {
            let devices = probe::scan_bus(&log, &mut dev);
            (dev, devices)
        });

        match timeout(self.config.probe_timeout, worker).await {
            Ok(Ok((_dev, devices))) => Some(devices),
            Ok(Err(err)) => {
                error!(
                    self.log, "probe worker died";
                    "bus" => bus,
                    "err" => %err,
                );
                None
            }
            Err(_) => {
                // The worker is presumably stuck mid-ioctl. It still owns
                // the fd, which stays open (and the worker leaked) until
                // that transaction returns; we just stop waiting and never
                // touch this bus again.
                error!(self.log, "bus timed out, blacklisting"; "bus" => bus);
                self.blacklist.insert(bus);
                None
            }
        }
    }

    async fn publish_device(
        &mut self,
        bus: BusId,
        address: DeviceAddress,
        raw: &[u8],
        inventory: &BusInventory,
    ) {
        let fields = match fru_format::decode(&self.log, raw) {
            Ok(fields) => fields,
            Err(err) => {
                warn!(
                    self.log, "failed to decode FRU";
                    "bus" => bus,
                    "address" => address,
                    "err" => %err,
                );
                return;
            }
        };

        let placement = dedup::place_device(
            &fields,
            bus,
            address,
            raw,
            inventory,
            &self.published,
            &mut self.unknown_count,
            self.config.mux_check,
        );
        let object = match placement {
            Placement::Publish(object) => object,
            Placement::MuxDuplicate => {
                debug!(
                    self.log, "suppressing mux duplicate";
                    "bus" => bus,
                    "address" => address,
                );
                return;
            }
        };

        let properties = inventory::prepare_properties(&self.log, &fields);
        match self
            .objects
            .publish(&object.path, properties, bus, address)
            .await
        {
            Ok(()) => {
                self.published.insert((bus, address), object);
            }
            Err(err) => {
                warn!(
                    self.log, "failed to publish object";
                    "err" => %err,
                );
            }
        }
    }
}

/// Adapter numbers of every `i2c-<N>` node in `dev_dir`, sorted.
fn enumerate_buses(log: &Logger, dev_dir: &Path) -> Vec<BusId> {
    let entries = match std::fs::read_dir(dev_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                log, "unable to enumerate I2C devices";
                "dir" => %dev_dir.display(),
                "err" => %err,
            );
            return Vec::new();
        }
    };

    let mut buses = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(number) = name.strip_prefix("i2c-") else { continue };
        let Ok(bus) = number.parse::<BusId>() else { continue };
        buses.push(bus);
    }
    buses.sort_unstable();
    buses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use async_trait::async_trait;
    use fru_format::FieldMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Publish { path: String, bus: BusId, address: DeviceAddress },
        Unpublish { path: String },
    }

    /// Records every object-server call for inspection.
    #[derive(Debug, Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn publishes(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, Event::Publish { .. }))
                .count()
        }
    }

    #[async_trait]
    impl ObjectServer for Recorder {
        async fn publish(
            &self,
            path: &str,
            _properties: Vec<(String, String)>,
            bus: BusId,
            address: DeviceAddress,
        ) -> Result<(), PublishError> {
            self.events.lock().unwrap().push(Event::Publish {
                path: path.to_string(),
                bus,
                address,
            });
            Ok(())
        }

        async fn unpublish(&self, path: &str) -> Result<(), PublishError> {
            self.events
                .lock()
                .unwrap()
                .push(Event::Unpublish { path: path.to_string() });
            Ok(())
        }
    }

    fn baseboard_image() -> Vec<u8> {
        let mut fields = FieldMap::new();
        fields.insert("BOARD_LANGUAGE_CODE".into(), "0".into());
        fields.insert("BOARD_MANUFACTURER".into(), "Oxide".into());
        fields.insert("BOARD_PRODUCT_NAME".into(), "Baseboard".into());
        fru_format::encode(&fields).unwrap()
    }

    /// A config that can't touch real hardware: an empty dev dir and a
    /// temp baseboard path.
    fn test_config(dir: &tempfile::TempDir) -> ScanConfig {
        ScanConfig {
            dev_dir: dir.path().join("dev"),
            baseboard_path: dir.path().join("baseboard.fru.bin"),
            debounce: Duration::from_millis(100),
            probe_timeout: Duration::from_secs(5),
            mux_check: |_| false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn startup_scan_publishes_the_baseboard() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::create_dir(&config.dev_dir).unwrap();
        let image = baseboard_image();
        std::fs::write(&config.baseboard_path, &image).unwrap();

        let recorder = Arc::new(Recorder::default());
        let manager = FruManager::new(
            config,
            BusBlacklist::new(),
            Arc::clone(&recorder),
            &log(),
        );

        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(manager.raw_fru(0, 0).await.unwrap(), image);
        assert_eq!(
            recorder.events(),
            vec![Event::Publish {
                path: "/xyz/openbmc_project/FruDevice/Baseboard".into(),
                bus: 0,
                address: 0,
            }],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_devices_are_invalid_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::create_dir(&config.dev_dir).unwrap();

        let manager = FruManager::new(
            config,
            BusBlacklist::new(),
            Arc::new(Recorder::default()),
            &log(),
        );
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            manager.raw_fru(9, 0x50).await,
            Err(InventoryError::InvalidBus),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rescan_triggers_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::create_dir(&config.dev_dir).unwrap();
        std::fs::write(&config.baseboard_path, baseboard_image()).unwrap();

        let recorder = Arc::new(Recorder::default());
        let manager = FruManager::new(
            config,
            BusBlacklist::new(),
            Arc::clone(&recorder),
            &log(),
        );

        // A burst of triggers inside the debounce window joins the startup
        // trigger: one cycle total.
        for _ in 0..3 {
            manager.schedule_rescan().await;
        }
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.publishes(), 1);

        // A later burst produces exactly one more.
        for _ in 0..3 {
            manager.schedule_rescan().await;
        }
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.publishes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rescan_republishes_and_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::create_dir(&config.dev_dir).unwrap();
        std::fs::write(&config.baseboard_path, baseboard_image()).unwrap();

        let recorder = Arc::new(Recorder::default());
        let manager = FruManager::new(
            config,
            BusBlacklist::new(),
            Arc::clone(&recorder),
            &log(),
        );
        time::sleep(Duration::from_secs(1)).await;

        manager.schedule_rescan().await;
        time::sleep(Duration::from_secs(1)).await;

        let path = "/xyz/openbmc_project/FruDevice/Baseboard".to_string();
        assert_eq!(
            recorder.events(),
            vec![
                Event::Publish { path: path.clone(), bus: 0, address: 0 },
                Event::Unpublish { path: path.clone() },
                Event::Publish { path, bus: 0, address: 0 },
            ],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn write_to_baseboard_lands_in_the_next_scan() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::create_dir(&config.dev_dir).unwrap();
        std::fs::write(&config.baseboard_path, baseboard_image()).unwrap();

        let recorder = Arc::new(Recorder::default());
        let manager = FruManager::new(
            config,
            BusBlacklist::new(),
            Arc::clone(&recorder),
            &log(),
        );
        time::sleep(Duration::from_secs(1)).await;

        let mut fields = FieldMap::new();
        fields.insert("BOARD_LANGUAGE_CODE".into(), "0".into());
        fields.insert("BOARD_MANUFACTURER".into(), "Oxide".into());
        fields.insert("BOARD_PRODUCT_NAME".into(), "Replacement".into());
        let replacement = fru_format::encode(&fields).unwrap();

        manager.write_fru(0, 0, replacement.clone()).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(manager.raw_fru(0, 0).await.unwrap(), replacement);
        assert!(recorder.events().contains(&Event::Publish {
            path: "/xyz/openbmc_project/FruDevice/Replacement".into(),
            bus: 0,
            address: 0,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn write_rejects_bad_images() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::create_dir(&config.dev_dir).unwrap();

        let manager = FruManager::new(
            config,
            BusBlacklist::new(),
            Arc::new(Recorder::default()),
            &log(),
        );

        let err = manager.write_fru(0, 0, vec![0xde; 16]).await.unwrap_err();
        assert!(err.is_invalid_argument());

        let err = manager
            .write_fru(0, 0, vec![0; fru_format::MAX_FRU_SIZE + 1])
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::TooLarge));
    }
}
