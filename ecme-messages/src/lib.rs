// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed requests and responses exchanged with a node's management
//! controller (ECME).
//!
//! These types describe the controller's capability surface only; how a
//! session frames and authenticates them on the wire is up to the session
//! implementation.

mod request;
mod response;

use core::fmt;
use serde::Deserialize;
use serde::Serialize;

pub use request::*;
pub use response::*;

/// Version value the controller reports for an erased or invalid partition.
pub const ERASED_VERSION: u16 = 0xFFFF;

/// Opaque identifier of one in-flight firmware transfer, as assigned by the
/// controller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct TransferHandle(pub u32);

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of firmware stored in a partition.
///
/// The string forms match the type tokens used by the controller.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    strum_macros::Display,
)]
pub enum ImageType {
    /// Management controller firmware.
    #[strum(serialize = "SOC_ELF")]
    SocElf,
    /// Configuration data block; stored immediately after its `SOC_ELF`.
    #[strum(serialize = "CDB")]
    Cdb,
    /// First-stage application processor boot image.
    #[strum(serialize = "A9_EXEC")]
    A9Exec,
    /// Second-stage boot loader.
    #[strum(serialize = "A9_UBOOT")]
    A9Uboot,
    /// Boot environment (dual-slot: running and factory).
    #[strum(serialize = "UBOOTENV")]
    UbootEnv,
    /// Device tree blob.
    #[strum(serialize = "DTB")]
    Dtb,
    #[strum(serialize = "S2_ELF")]
    S2Elf,
    #[strum(serialize = "BOOT_LOG")]
    BootLog,
    /// Whole-flash raw image; only used during initial install.
    #[strum(serialize = "SPIF")]
    Spif,
}

bitflags::bitflags! {
    /// Raw flag word of a partition.
    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
    )]
    #[serde(transparent)]
    pub struct PartitionFlags: u32 {
        /// Set on the partition the running system booted from.
        const ACTIVE = 1 << 1;
    }
}

/// The controller's opinion of whether a partition is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InUseReport {
    Used,
    Unused,
    Unknown,
}

/// Metadata for one firmware partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// Partition number as reported by the controller.
    pub index: u8,
    pub image_type: ImageType,
    pub offset: u32,
    /// Capacity of the partition in bytes.
    pub size: u32,
    pub priority: u16,
    /// Memory address the image is loaded to.
    pub load_address: u32,
    pub flags: PartitionFlags,
    /// Image version; [`ERASED_VERSION`] if the partition holds no valid
    /// image.
    pub version: u16,
    pub in_use: InUseReport,
}

/// One row of the controller's firmware information table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareInfoEntry {
    Partition(PartitionInfo),
    /// A row that does not describe a firmware partition (e.g., a summary
    /// line).
    Other { label: String },
}

impl FirmwareInfoEntry {
    pub fn partition(&self) -> Option<&PartitionInfo> {
        match self {
            Self::Partition(info) => Some(info),
            Self::Other { .. } => None,
        }
    }
}
