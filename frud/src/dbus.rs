// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The D-Bus surface: the manager object, per-device objects, and the
//! chassis power-state signal match.

use async_trait::async_trait;
use fru_scan::error::PublishError;
use fru_scan::inventory::ObjectServer;
use fru_scan::BusId;
use fru_scan::DeviceAddress;
use fru_scan::FruManager;
use futures::StreamExt;
use slog::info;
use slog::warn;
use slog::Logger;
use std::collections::HashMap;
use std::sync::Arc;
use zbus::fdo;
use zbus::zvariant::Value;
use zbus::Connection;
use zbus::MatchRule;
use zbus::MessageStream;

pub const SERVICE_NAME: &str = "xyz.openbmc_project.FruDevice";
pub const MANAGER_PATH: &str = "/xyz/openbmc_project/FruDevice";

const POWER_PATH: &str = "/xyz/openbmc_project/Chassis/Control/Power0";
const POWER_INTERFACE: &str = "xyz.openbmc_project.Chassis.Control.Power";

/// The manager object: rescan on demand, raw image lookup, and write-back.
pub struct ManagerInterface {
    manager: Arc<FruManager>,
}

impl ManagerInterface {
    pub fn new(manager: Arc<FruManager>) -> Self {
        Self { manager }
    }
}

#[zbus::interface(name = "xyz.openbmc_project.FruDeviceManager")]
impl ManagerInterface {
    /// Schedule a rescan of every eligible bus.
    async fn re_scan(&self) {
        self.manager.schedule_rescan().await;
    }

    /// Fetch the raw FRU image the last scan found at `(bus, address)`.
    async fn get_raw_fru(
        &self,
        bus: u8,
        address: u8,
    ) -> fdo::Result<Vec<u8>> {
        self.manager
            .raw_fru(BusId::from(bus), DeviceAddress::from(address))
            .await
            .map_err(|err| fdo::Error::InvalidArgs(err.to_string()))
    }

    /// Write a FRU image to `(bus, address)` and rescan.
    async fn write_fru(
        &self,
        bus: u8,
        address: u8,
        data: Vec<u8>,
    ) -> fdo::Result<()> {
        self.manager
            .write_fru(BusId::from(bus), DeviceAddress::from(address), data)
            .await
            .map_err(|err| {
                if err.is_invalid_argument() {
                    fdo::Error::InvalidArgs(err.to_string())
                } else {
                    fdo::Error::Failed(err.to_string())
                }
            })
    }
}

/// One published FRU device. The decoded fields arrive pre-sanitized from
/// the scan loop; absent fields read back as empty strings.
pub struct FruObject {
    properties: HashMap<String, String>,
    bus: u32,
    address: u32,
}

impl FruObject {
    fn field(&self, key: &str) -> String {
        self.properties.get(key).cloned().unwrap_or_default()
    }
}

#[zbus::interface(name = "xyz.openbmc_project.FruDevice")]
impl FruObject {
    #[zbus(property, name = "BUS")]
    fn bus(&self) -> u32 {
        self.bus
    }

    #[zbus(property, name = "ADDRESS")]
    fn address(&self) -> u32 {
        self.address
    }

    #[zbus(property, name = "Common_Format_Version")]
    fn common_format_version(&self) -> String {
        self.field("Common_Format_Version")
    }

    #[zbus(property, name = "CHASSIS_TYPE")]
    fn chassis_type(&self) -> String {
        self.field("CHASSIS_TYPE")
    }

    #[zbus(property, name = "CHASSIS_PART_NUMBER")]
    fn chassis_part_number(&self) -> String {
        self.field("CHASSIS_PART_NUMBER")
    }

    #[zbus(property, name = "CHASSIS_SERIAL_NUMBER")]
    fn chassis_serial_number(&self) -> String {
        self.field("CHASSIS_SERIAL_NUMBER")
    }

    #[zbus(property, name = "CHASSIS_INFO_AM1")]
    fn chassis_info_am1(&self) -> String {
        self.field("CHASSIS_INFO_AM1")
    }

    #[zbus(property, name = "CHASSIS_INFO_AM2")]
    fn chassis_info_am2(&self) -> String {
        self.field("CHASSIS_INFO_AM2")
    }

    #[zbus(property, name = "BOARD_LANGUAGE_CODE")]
    fn board_language_code(&self) -> String {
        self.field("BOARD_LANGUAGE_CODE")
    }

    #[zbus(property, name = "BOARD_MANUFACTURE_DATE")]
    fn board_manufacture_date(&self) -> String {
        self.field("BOARD_MANUFACTURE_DATE")
    }

    #[zbus(property, name = "BOARD_MANUFACTURER")]
    fn board_manufacturer(&self) -> String {
        self.field("BOARD_MANUFACTURER")
    }

    #[zbus(property, name = "BOARD_PRODUCT_NAME")]
    fn board_product_name(&self) -> String {
        self.field("BOARD_PRODUCT_NAME")
    }

    #[zbus(property, name = "BOARD_SERIAL_NUMBER")]
    fn board_serial_number(&self) -> String {
        self.field("BOARD_SERIAL_NUMBER")
    }

    #[zbus(property, name = "BOARD_PART_NUMBER")]
    fn board_part_number(&self) -> String {
        self.field("BOARD_PART_NUMBER")
    }

    #[zbus(property, name = "BOARD_FRU_VERSION_ID")]
    fn board_fru_version_id(&self) -> String {
        self.field("BOARD_FRU_VERSION_ID")
    }

    #[zbus(property, name = "BOARD_INFO_AM1")]
    fn board_info_am1(&self) -> String {
        self.field("BOARD_INFO_AM1")
    }

    #[zbus(property, name = "BOARD_INFO_AM2")]
    fn board_info_am2(&self) -> String {
        self.field("BOARD_INFO_AM2")
    }

    #[zbus(property, name = "PRODUCT_LANGUAGE_CODE")]
    fn product_language_code(&self) -> String {
        self.field("PRODUCT_LANGUAGE_CODE")
    }

    #[zbus(property, name = "PRODUCT_MANUFACTURER")]
    fn product_manufacturer(&self) -> String {
        self.field("PRODUCT_MANUFACTURER")
    }

    #[zbus(property, name = "PRODUCT_PRODUCT_NAME")]
    fn product_product_name(&self) -> String {
        self.field("PRODUCT_PRODUCT_NAME")
    }

    #[zbus(property, name = "PRODUCT_PART_NUMBER")]
    fn product_part_number(&self) -> String {
        self.field("PRODUCT_PART_NUMBER")
    }

    #[zbus(property, name = "PRODUCT_VERSION")]
    fn product_version(&self) -> String {
        self.field("PRODUCT_VERSION")
    }

    #[zbus(property, name = "PRODUCT_SERIAL_NUMBER")]
    fn product_serial_number(&self) -> String {
        self.field("PRODUCT_SERIAL_NUMBER")
    }

    #[zbus(property, name = "PRODUCT_ASSET_TAG")]
    fn product_asset_tag(&self) -> String {
        self.field("PRODUCT_ASSET_TAG")
    }

    #[zbus(property, name = "PRODUCT_FRU_VERSION_ID")]
    fn product_fru_version_id(&self) -> String {
        self.field("PRODUCT_FRU_VERSION_ID")
    }

    #[zbus(property, name = "PRODUCT_INFO_AM1")]
    fn product_info_am1(&self) -> String {
        self.field("PRODUCT_INFO_AM1")
    }

    #[zbus(property, name = "PRODUCT_INFO_AM2")]
    fn product_info_am2(&self) -> String {
        self.field("PRODUCT_INFO_AM2")
    }
}

/// The scan loop's view of the bus: add and remove [`FruObject`]s.
pub struct DbusObjectServer {
    connection: Connection,
}

impl DbusObjectServer {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ObjectServer for DbusObjectServer {
    async fn publish(
        &self,
        path: &str,
        properties: Vec<(String, String)>,
        bus: BusId,
        address: DeviceAddress,
    ) -> Result<(), PublishError> {
        let object = FruObject {
            properties: properties.into_iter().collect(),
            bus,
            address: u32::from(address),
        };
        self.connection
            .object_server()
            .at(path, object)
            .await
            .map_err(|err| PublishError {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    async fn unpublish(&self, path: &str) -> Result<(), PublishError> {
        self.connection
            .object_server()
            .remove::<FruObject, _>(path)
            .await
            .map_err(|err| PublishError {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }
}

/// Watch for chassis power-state property changes; any payload carrying a
/// `pgood` key triggers a rescan.
pub async fn watch_power_state(
    connection: &Connection,
    manager: Arc<FruManager>,
    log: Logger,
) -> anyhow::Result<()> {
    let rule = MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .interface("org.freedesktop.DBus.Properties")?
        .member("PropertiesChanged")?
        .path(POWER_PATH)?
        .arg(0, POWER_INTERFACE)?
        .build();
    let mut stream =
        MessageStream::for_match_rule(rule, connection, None).await?;

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!(log, "power match stream error"; "err" => %err);
                continue;
            }
        };
        let body = message.body();
        let Ok((_interface, changed, _invalidated)) = body
            .deserialize::<(String, HashMap<String, Value>, Vec<String>)>()
        else {
            continue;
        };
        if changed.contains_key("pgood") {
            info!(log, "chassis power state changed, rescanning");
            manager.schedule_rescan().await;
        }
    }

    Ok(())
}
