// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::FirmwareInfoEntry;
use crate::PowerRestorePolicy;
use crate::TransferHandle;
use core::fmt;
use serde::Deserialize;
use serde::Serialize;

/// Response from the controller.
///
/// Fields the controller is allowed to omit are `Option`s; whether an omitted
/// field is acceptable is decided by the caller, never defaulted here.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ControllerResponse {
    ChassisStatus(ChassisStatus),
    SetChassisPowerAck,
    SetChassisPolicyAck,
    McResetAck,
    SdrList(Vec<SensorReading>),
    FirmwareInfo(Vec<FirmwareInfoEntry>),
    /// Reply to `UpdateFirmware` and `RetrieveFirmware`.
    FirmwareTransferStarted { handle: Option<TransferHandle> },
    FirmwareStatus { status: Option<TransferStatus> },
    FirmwareCheck(FirmwareCheck),
    ActivateFirmwareAck,
    ResetFirmwareAck,
    SelClearAck,
    SetFirmwareVersionAck,
    /// Reply to `GetFabricIpInfo` and `GetFabricMacAddresses`; the table
    /// itself arrives through the file transport.
    FabricInfoAck,
    InfoBasic(InfoBasic),
    InfoCard(InfoCard),
    Error(ControllerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChassisStatus {
    pub power_on: bool,
    pub power_restore_policy: PowerRestorePolicy,
}

/// One sensor data record with its current reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub name: String,
    /// Reading as rendered by the controller, e.g. `"38 degrees C"`.
    pub reading: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    InProgress,
    Complete,
    /// Any other terminal status, with the controller's description.
    Failed(String),
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "In progress"),
            Self::Complete => write!(f, "Complete"),
            Self::Failed(status) => write!(f, "{status}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareCheck {
    pub partition: u8,
    pub crc32: Option<u32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoBasic {
    pub iana: u32,
    /// Package version string the node was last updated to.
    pub firmware_version: String,
    /// Version of the management controller firmware.
    pub ecme_version: String,
    pub build_number: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoCard {
    pub card_type: String,
    pub revision: u8,
}

/// Error reported by the controller itself (as opposed to a failure to reach
/// it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerError {
    pub completion_code: u8,
    pub message: String,
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "completion code {:#04x}: {}",
            self.completion_code, self.message
        )
    }
}

impl std::error::Error for ControllerError {}
