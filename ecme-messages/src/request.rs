// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::ImageType;
use crate::TransferHandle;
use serde::Deserialize;
use serde::Serialize;
use std::net::SocketAddr;

#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ControllerRequest {
    GetChassisStatus,
    SetChassisPower(PowerCommand),
    SetChassisPolicy(PowerRestorePolicy),
    /// Cold-reset the management controller.
    McReset,
    SdrList,
    GetFirmwareInfo,
    /// Pull `filename` from the file transport at `transport_addr` and write
    /// it into `partition`.
    UpdateFirmware {
        filename: String,
        partition: u8,
        image_type: ImageType,
        transport_addr: SocketAddr,
    },
    /// Push the contents of `partition` to the file transport at
    /// `transport_addr` as `filename`.
    RetrieveFirmware {
        filename: String,
        partition: u8,
        image_type: ImageType,
        transport_addr: SocketAddr,
    },
    GetFirmwareStatus(TransferHandle),
    /// Compute the CRC32 of the image in `partition`.
    CheckFirmware { partition: u8 },
    ActivateFirmware { partition: u8 },
    /// Reset the persistent configuration area to factory defaults.
    ResetFirmware,
    SelClear,
    SetFirmwareVersion { version: String },
    /// Ask the controller to push the fabric's IP address table to the file
    /// transport.
    GetFabricIpInfo { filename: String, transport_addr: SocketAddr },
    /// Ask the controller to push the fabric's MAC address table to the file
    /// transport.
    GetFabricMacAddresses { filename: String, transport_addr: SocketAddr },
    GetInfoBasic,
    GetInfoCard,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum PowerCommand {
    On,
    Off,
    Reset,
}

/// Power state the chassis returns to after power is restored.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[strum(serialize_all = "kebab-case")]
pub enum PowerRestorePolicy {
    AlwaysOn,
    AlwaysOff,
    Previous,
}
