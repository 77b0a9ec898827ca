// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deploying a whole firmware package to one node.
//!
//! Planning is pure: given a partition table and a package, [`plan_update`]
//! decides every partition that will be written and the priority they all
//! share. [`check_readiness`] adds the package compatibility checks on top
//! of that, which is what lets "is this package applicable?" be answered
//! without touching the node.
//!
//! Nothing here is transactional. The first failure stops the update, and
//! whatever was activated before it stays activated.

use crate::boot_env::BootEnvFormat;
use crate::boot_env::BOOTCMD_DEFAULT;
use crate::error::CommunicationError;
use crate::error::TransferError;
use crate::error::UpdateError;
use crate::image::ConfigClass;
use crate::image::FirmwarePackage;
use crate::image::Image;
use crate::partition::Partition;
use crate::partition::PartitionTable;
use crate::priority::next_priority;
use crate::response_expect::expect_set_firmware_version_ack;
use crate::selector::select;
use crate::selector::select_all;
use crate::selector::PartitionPolicy;
use crate::transfer::TransferSession;
use ecme_messages::ControllerRequest;
use ecme_messages::ImageType;
use ecme_messages::InfoBasic;
use semver::Version;
use slog::debug;
use slog::info;
use slog::warn;

/// Firmware version string a node reports before it has ever been updated.
const UNKNOWN_FIRMWARE_VERSION: &str = "Unknown";

/// Firmware version strings this long are not package versions, and say
/// nothing about the host's layout.
const MAX_PACKAGE_VERSION_LEN: usize = 32;

/// What a planned write does with its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Write the image as-is.
    Image,
    /// Write a boot environment image as-is to the factory slot.
    BootEnvFactory,
    /// Write a boot environment image to the running slot, keeping the
    /// running environment's default boot command.
    BootEnvRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWrite {
    pub image: Image,
    pub partition: Partition,
    pub kind: WriteKind,
}

/// Every write an update will make, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    /// Priority stamped on every written image.
    pub priority: u16,
    pub writes: Vec<PlannedWrite>,
}

/// Work out where each image of `package` goes.
///
/// Boot environment images always go to both the running (first) and
/// factory (second) slots, whatever `policy` says.
pub fn plan_update(
    table: &PartitionTable,
    package: &FirmwarePackage,
    policy: PartitionPolicy,
    priority: Option<u16>,
) -> Result<UpdatePlan, UpdateError> {
    let priority = match priority {
        Some(priority) => priority,
        None => next_priority(table, &package.image_types())?,
    };

    let mut writes = Vec::new();
    for image in &package.images {
        let image_type = image.image_type();
        if image_type == ImageType::UbootEnv {
            let running = select(table, image_type, PartitionPolicy::First)?;
            let factory = select(table, image_type, PartitionPolicy::Second)?;
            writes.push(PlannedWrite {
                image: image.clone(),
                partition: factory.clone(),
                kind: WriteKind::BootEnvFactory,
            });
            writes.push(PlannedWrite {
                image: image.clone(),
                partition: running.clone(),
                kind: WriteKind::BootEnvRunning,
            });
        } else {
            for partition in select_all(table, image_type, policy)? {
                writes.push(PlannedWrite {
                    image: image.clone(),
                    partition: partition.clone(),
                    kind: WriteKind::Image,
                });
            }
        }
    }

    Ok(UpdatePlan { priority, writes })
}

/// Decide whether `package` can be deployed to a node, without touching it.
///
/// On success, returns the plan an update would follow.
pub fn check_readiness(
    info: &InfoBasic,
    table: &PartitionTable,
    package: &FirmwarePackage,
    policy: PartitionPolicy,
    priority: Option<u16>,
) -> Result<UpdatePlan, UpdateError> {
    if let Some(required) = &package.required_ecme_version {
        let found = parse_controller_version(&info.ecme_version)?;
        let needed = parse_controller_version(required)?;
        if found < needed {
            return Err(UpdateError::ControllerVersionTooOld {
                required: needed.to_string(),
                found: found.to_string(),
            });
        }
    }

    let version = &info.firmware_version;
    if version != UNKNOWN_FIRMWARE_VERSION
        && version.len() < MAX_PACKAGE_VERSION_LEN
    {
        let host = ConfigClass::of_firmware_version(version);
        if package.config != host {
            return Err(UpdateError::ConfigClassMismatch {
                package: package.config,
                host,
            });
        }
    }

    plan_update(table, package, policy, priority)
}

/// Parse a controller version like `v1.7` or `1.7.1-dirty`, comparing only
/// its numeric components.
fn parse_controller_version(s: &str) -> Result<Version, UpdateError> {
    let invalid = || UpdateError::InvalidControllerVersion(s.to_string());

    let numeric = s.trim().trim_start_matches('v');
    let numeric = numeric.split(['-', '+']).next().unwrap_or(numeric);
    let mut parts = [0u64; 3];
    let mut count = 0;
    for part in numeric.split('.') {
        let slot = parts.get_mut(count).ok_or_else(invalid)?;
        *slot = part.parse().map_err(|_| invalid())?;
        count += 1;
    }
    Ok(Version::new(parts[0], parts[1], parts[2]))
}

/// One partition an update wrote and activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenPartition {
    pub image_type: ImageType,
    pub partition: u8,
}

#[derive(Debug)]
pub struct UpdateReport {
    pub priority: u16,
    pub written: Vec<WrittenPartition>,
    /// Every image was written, but recording the package version on the
    /// node failed.
    pub version_error: Option<CommunicationError>,
}

pub(crate) struct UpdateOrchestrator<'a> {
    pub(crate) transfers: TransferSession<'a>,
    pub(crate) boot_env_format: &'a dyn BootEnvFormat,
}

impl UpdateOrchestrator<'_> {
    pub(crate) async fn run(
        &self,
        plan: &UpdatePlan,
        package: &FirmwarePackage,
    ) -> Result<UpdateReport, UpdateError> {
        let log = self.transfers.log;
        info!(
            log, "starting firmware update";
            "priority" => plan.priority,
            "writes" => plan.writes.len(),
            "version" => ?package.version,
        );

        let mut written = Vec::with_capacity(plan.writes.len());
        for write in &plan.writes {
            let image = match write.kind {
                WriteKind::Image | WriteKind::BootEnvFactory => {
                    write.image.clone()
                }
                WriteKind::BootEnvRunning => {
                    self.running_boot_env(&write.image, &write.partition)
                        .await?
                }
            };
            self.transfers
                .upload(&image, &write.partition, Some(plan.priority))
                .await?;
            written.push(WrittenPartition {
                image_type: write.partition.image_type,
                partition: write.partition.index,
            });
        }

        let mut version_error = None;
        if let Some(version) = &package.version {
            let result = self
                .transfers
                .controller
                .rpc(ControllerRequest::SetFirmwareVersion {
                    version: version.clone(),
                })
                .await
                .and_then(expect_set_firmware_version_ack);
            if let Err(err) = result {
                warn!(
                    log, "firmware updated but failed to record its version";
                    "version" => version,
                    &err,
                );
                version_error = Some(err);
            }
        }

        info!(log, "firmware update complete"; "written" => written.len());
        Ok(UpdateReport { priority: plan.priority, written, version_error })
    }

    /// The boot environment to write to the running slot: the package's,
    /// with the default boot command currently in `running` carried over.
    async fn running_boot_env(
        &self,
        image: &Image,
        running: &Partition,
    ) -> Result<Image, UpdateError> {
        let current = self.transfers.download(running).await?;
        let current = self.boot_env_format.decode(current.data())?;
        let Some(bootcmd) = current.get(BOOTCMD_DEFAULT) else {
            return Ok(image.clone());
        };

        debug!(
            self.transfers.log, "keeping running default boot command";
            "bootcmd" => bootcmd,
        );
        let payload = self
            .transfers
            .image_format
            .decode(image.data())
            .map_err(|err| TransferError::ImageFormat {
                partition: running.index,
                err,
            })?;
        let mut env = self.boot_env_format.decode(&payload)?;
        env.set(BOOTCMD_DEFAULT, bootcmd)?;
        Ok(image.with_data(self.boot_env_format.encode(&env)?))
    }
}
