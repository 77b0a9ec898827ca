// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::controller::Controller;
use crate::error::UpdateError;
use crate::response_expect::expect_firmware_info;
use ecme_messages::ControllerRequest;
use ecme_messages::FirmwareInfoEntry;
use ecme_messages::ImageType;
use ecme_messages::InUseReport;
use ecme_messages::PartitionFlags;
use ecme_messages::PartitionInfo;
use serde::Serialize;
use slog::debug;
use slog::Logger;

/// Whether a partition is in use by the running system, after inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InUse {
    Used,
    Unused,
    Unknown,
}

impl From<InUseReport> for InUse {
    fn from(report: InUseReport) -> Self {
        match report {
            InUseReport::Used => Self::Used,
            InUseReport::Unused => Self::Unused,
            InUseReport::Unknown => Self::Unknown,
        }
    }
}

/// One firmware slot on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub index: u8,
    pub image_type: ImageType,
    pub version: u16,
    pub priority: u16,
    pub flags: PartitionFlags,
    pub in_use: InUse,
    /// Capacity of the slot in bytes.
    pub size_limit: u32,
    pub load_address: u32,
}

impl Partition {
    pub fn is_active(&self) -> bool {
        self.flags.contains(PartitionFlags::ACTIVE)
    }
}

impl From<&PartitionInfo> for Partition {
    fn from(info: &PartitionInfo) -> Self {
        Self {
            index: info.index,
            image_type: info.image_type,
            version: info.version,
            priority: info.priority,
            flags: info.flags,
            in_use: info.in_use.into(),
            size_limit: info.size,
            load_address: info.load_address,
        }
    }
}

/// Snapshot of a node's partitions, in the order the controller reported
/// them.
///
/// A table is stale as soon as anything writes to the node; refetch it
/// rather than reusing it across mutating operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionTable {
    partitions: Vec<Partition>,
}

impl PartitionTable {
    pub(crate) async fn fetch(
        controller: &Controller,
        log: &Logger,
    ) -> Result<Self, UpdateError> {
        let entries = controller
            .rpc(ControllerRequest::GetFirmwareInfo)
            .await
            .and_then(expect_firmware_info)?;
        let table = Self::from_entries(&entries)?;
        debug!(
            log, "fetched partition table";
            "rows" => entries.len(),
            "partitions" => table.partitions.len(),
        );
        Ok(table)
    }

    /// Build a table from the controller's firmware info rows, dropping rows
    /// that do not describe a partition and resolving `CDB` partitions whose
    /// in-use state the controller could not report.
    pub fn from_entries(
        entries: &[FirmwareInfoEntry],
    ) -> Result<Self, UpdateError> {
        let partitions = infer_in_use(
            entries.iter().filter_map(FirmwareInfoEntry::partition).map(
                Partition::from,
            ),
        );
        if partitions.is_empty() {
            return Err(UpdateError::NoFirmwareInfo);
        }
        Ok(Self { partitions })
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Partitions holding `image_type`, in table order.
    pub fn of_type(
        &self,
        image_type: ImageType,
    ) -> impl Iterator<Item = &Partition> + '_ {
        self.partitions.iter().filter(move |p| p.image_type == image_type)
    }
}

/// A `CDB` lives right after the `SOC_ELF` that uses it, so an unknown `CDB`
/// takes on that partition's state. Anything else in front of it means we
/// can't tell, and assume it's used.
fn infer_in_use(partitions: impl Iterator<Item = Partition>) -> Vec<Partition> {
    partitions
        .scan(None, |previous: &mut Option<(ImageType, InUse)>, mut p| {
            if p.image_type == ImageType::Cdb && p.in_use == InUse::Unknown {
                if let Some((prev_type, prev_in_use)) = *previous {
                    p.in_use = if prev_type == ImageType::SocElf {
                        prev_in_use
                    } else {
                        InUse::Used
                    };
                }
            }
            *previous = Some((p.image_type, p.in_use));
            Some(p)
        })
        .collect()
}
