// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::boot_env::BootDevice;
use crate::boot_env::BootEnv;
use crate::boot_env::BootEnvFormat;
use crate::boot_env::UbootEnvFormat;
use crate::config::NodeConfig;
use crate::controller::Controller;
use crate::controller::ControllerSession;
use crate::error::NodeError;
use crate::error::UpdateError;
use crate::fabric::FabricQuery;
use crate::fabric::MacAddr;
use crate::fabric::NodeId;
use crate::file_transport::FileTransport;
use crate::image::FirmwarePackage;
use crate::image::Image;
use crate::image::ImageFormat;
use crate::image::SimgFormat;
use crate::orchestrator::check_readiness;
use crate::orchestrator::plan_update;
use crate::orchestrator::UpdateOrchestrator;
use crate::orchestrator::UpdatePlan;
use crate::orchestrator::UpdateReport;
use crate::orchestrator::WrittenPartition;
use crate::partition::PartitionTable;
use crate::priority::next_version;
use crate::response_expect::expect_chassis_status;
use crate::response_expect::expect_info_basic;
use crate::response_expect::expect_info_card;
use crate::response_expect::expect_mc_reset_ack;
use crate::response_expect::expect_reset_firmware_ack;
use crate::response_expect::expect_sdr_list;
use crate::response_expect::expect_sel_clear_ack;
use crate::response_expect::expect_set_chassis_policy_ack;
use crate::response_expect::expect_set_chassis_power_ack;
use crate::selector::select;
use crate::selector::PartitionPolicy;
use crate::transfer::TransferSession;
use ecme_messages::ControllerRequest;
use ecme_messages::ImageType;
use ecme_messages::InfoBasic;
use ecme_messages::PowerCommand;
use ecme_messages::PowerRestorePolicy;
use ecme_messages::SensorReading;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Components whose versions [`Node::info_basic`] reports, taken from the
/// active partition of each.
const COMPONENT_IMAGE_TYPES: [ImageType; 7] = [
    ImageType::Cdb,
    ImageType::S2Elf,
    ImageType::BootLog,
    ImageType::A9Exec,
    ImageType::A9Uboot,
    ImageType::UbootEnv,
    ImageType::Dtb,
];

const UNKNOWN_CARD: &str = "Unknown";

/// Inventory of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// As reported by the controller, except that `ecme_version` is
    /// `v`-prefixed.
    pub basic: InfoBasic,
    /// Version of the active image of each component that has one.
    pub component_versions: BTreeMap<ImageType, u16>,
    /// Card model and revision, or `"Unknown"` if the controller couldn't
    /// tell us.
    pub card: String,
}

/// One compute node, reached through its management controller.
///
/// Every `Node` owns its own collaborators and shares no mutable state with
/// any other, so operations on different nodes may run concurrently. The file
/// transport may be shared; transfer file names are unique per node and
/// transfer.
pub struct Node {
    controller: Controller,
    transport: Arc<dyn FileTransport>,
    image_format: Box<dyn ImageFormat>,
    boot_env_format: Box<dyn BootEnvFormat>,
    config: NodeConfig,
    log: Logger,
}

impl Node {
    pub fn new<S: ControllerSession>(
        session: S,
        transport: Arc<dyn FileTransport>,
        log: &Logger,
    ) -> Self {
        let log = log.new(o!("node" => session.address().to_string()));
        Self {
            controller: Controller::new(Box::new(session), log.clone()),
            transport,
            image_format: Box::new(SimgFormat),
            boot_env_format: Box::new(UbootEnvFormat::default()),
            config: NodeConfig::default(),
            log,
        }
    }

    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_image_format<F: ImageFormat>(mut self, format: F) -> Self {
        self.image_format = Box::new(format);
        self
    }

    pub fn with_boot_env_format<F: BootEnvFormat>(mut self, format: F) -> Self {
        self.boot_env_format = Box::new(format);
        self
    }

    pub fn address(&self) -> IpAddr {
        self.controller.address()
    }

    fn transfers(&self) -> TransferSession<'_> {
        TransferSession {
            controller: &self.controller,
            transport: &*self.transport,
            image_format: &*self.image_format,
            config: &self.config,
            log: &self.log,
        }
    }

    fn fabric(&self) -> FabricQuery<'_> {
        FabricQuery {
            controller: &self.controller,
            transport: &*self.transport,
            config: &self.config,
            log: &self.log,
        }
    }

    /// Whether chassis power is on.
    pub async fn power_on(&self) -> Result<bool, NodeError> {
        let status = self
            .controller
            .rpc(ControllerRequest::GetChassisStatus)
            .await
            .and_then(expect_chassis_status)?;
        Ok(status.power_on)
    }

    pub async fn set_power(
        &self,
        command: PowerCommand,
    ) -> Result<(), NodeError> {
        self.controller
            .rpc(ControllerRequest::SetChassisPower(command))
            .await
            .and_then(expect_set_chassis_power_ack)?;
        Ok(())
    }

    /// The power state the chassis returns to when power is restored.
    pub async fn power_policy(&self) -> Result<PowerRestorePolicy, NodeError> {
        let status = self
            .controller
            .rpc(ControllerRequest::GetChassisStatus)
            .await
            .and_then(expect_chassis_status)?;
        Ok(status.power_restore_policy)
    }

    pub async fn set_power_policy(
        &self,
        policy: PowerRestorePolicy,
    ) -> Result<(), NodeError> {
        self.controller
            .rpc(ControllerRequest::SetChassisPolicy(policy))
            .await
            .and_then(expect_set_chassis_policy_ack)?;
        Ok(())
    }

    /// Cold-reset the management controller.
    pub async fn mc_reset(&self) -> Result<(), NodeError> {
        self.controller
            .rpc(ControllerRequest::McReset)
            .await
            .and_then(expect_mc_reset_ack)?;
        Ok(())
    }

    /// Sensor readings, limited to sensors whose name contains `filter`
    /// (ignoring case) if one is given.
    pub async fn sensors(
        &self,
        filter: Option<&str>,
    ) -> Result<Vec<SensorReading>, NodeError> {
        let mut sensors = self
            .controller
            .rpc(ControllerRequest::SdrList)
            .await
            .and_then(expect_sdr_list)?;

        let filter = filter.unwrap_or("");
        let needle = filter.to_lowercase();
        sensors.retain(|s| s.name.to_lowercase().contains(&needle));
        if sensors.is_empty() {
            return Err(NodeError::NoSensor { filter: filter.to_string() });
        }
        Ok(sensors)
    }

    pub async fn firmware_info(&self) -> Result<PartitionTable, UpdateError> {
        PartitionTable::fetch(&self.controller, &self.log).await
    }

    /// Deploy every image of `package`.
    ///
    /// Images go to the partitions `policy` picks (boot environments always
    /// go to both of theirs), stamped with `priority` or, without one, the
    /// next priority after those of the partitions being replaced. The first
    /// failure ends the update; partitions already written stay activated.
    pub async fn update_firmware(
        &self,
        package: &FirmwarePackage,
        policy: PartitionPolicy,
        priority: Option<u16>,
    ) -> Result<UpdateReport, UpdateError> {
        let table = self.firmware_info().await?;
        let plan = plan_update(&table, package, policy, priority)?;
        let orchestrator = UpdateOrchestrator {
            transfers: self.transfers(),
            boot_env_format: &*self.boot_env_format,
        };
        orchestrator.run(&plan, package).await
    }

    /// Check whether `package` could be deployed with [`Node::update_firmware`]
    /// without changing anything, returning the plan it would follow.
    pub async fn check_update(
        &self,
        package: &FirmwarePackage,
        policy: PartitionPolicy,
        priority: Option<u16>,
    ) -> Result<UpdatePlan, UpdateError> {
        let info = self
            .controller
            .rpc(ControllerRequest::GetInfoBasic)
            .await
            .and_then(expect_info_basic)?;
        let table = self.firmware_info().await?;
        check_readiness(&info, &table, package, policy, priority)
    }

    /// Like [`Node::check_update`], but a package that doesn't apply to this
    /// node is `false` rather than an error. Failing to find out still is.
    pub async fn is_updatable(
        &self,
        package: &FirmwarePackage,
        policy: PartitionPolicy,
        priority: Option<u16>,
    ) -> Result<bool, UpdateError> {
        match self.check_update(package, policy, priority).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_readiness_failure() => {
                info!(self.log, "package does not apply to node"; &err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Write a single image to the partition `policy` picks, versioned one
    /// past the newest image of its type.
    pub async fn update_image(
        &self,
        image: &Image,
        policy: PartitionPolicy,
    ) -> Result<WrittenPartition, UpdateError> {
        let table = self.firmware_info().await?;
        let partition = select(&table, image.image_type(), policy)?;
        let version = next_version(&table, image.image_type());
        self.transfers().upload(image, partition, Some(version)).await?;
        Ok(WrittenPartition {
            image_type: partition.image_type,
            partition: partition.index,
        })
    }

    /// Return the node's configuration to factory defaults: reset the
    /// configuration area, restore the running boot environment from the
    /// factory one, and clear the event log.
    ///
    /// A failure partway through leaves the earlier steps done.
    pub async fn config_reset(&self) -> Result<(), UpdateError> {
        self.controller
            .rpc(ControllerRequest::ResetFirmware)
            .await
            .and_then(expect_reset_firmware_ack)?;
        info!(self.log, "configuration area reset");

        let table = self.firmware_info().await?;
        let running =
            select(&table, ImageType::UbootEnv, PartitionPolicy::First)?;
        let factory =
            select(&table, ImageType::UbootEnv, PartitionPolicy::Second)?;
        let transfers = self.transfers();
        let image = transfers.download(factory).await?;
        transfers.upload(&image, running, None).await?;
        info!(
            self.log, "restored running boot environment";
            "from" => factory.index,
            "to" => running.index,
        );

        self.controller
            .rpc(ControllerRequest::SelClear)
            .await
            .and_then(expect_sel_clear_ack)?;
        Ok(())
    }

    /// The active boot environment.
    pub async fn ubootenv(&self) -> Result<BootEnv, UpdateError> {
        let table = self.firmware_info().await?;
        let active =
            select(&table, ImageType::UbootEnv, PartitionPolicy::Active)?;
        let image = self.transfers().download(active).await?;
        Ok(self.boot_env_format.decode(image.data())?)
    }

    pub async fn boot_order(&self) -> Result<Vec<BootDevice>, UpdateError> {
        Ok(self.ubootenv().await?.boot_order()?)
    }

    /// Rewrite the boot order of the active boot environment into the first
    /// boot environment slot, at a priority that outranks both.
    pub async fn set_boot_order(
        &self,
        devices: &[BootDevice],
    ) -> Result<(), UpdateError> {
        let table = self.firmware_info().await?;
        let first =
            select(&table, ImageType::UbootEnv, PartitionPolicy::First)?;
        let active =
            select(&table, ImageType::UbootEnv, PartitionPolicy::Active)?;

        let transfers = self.transfers();
        let image = transfers.download(active).await?;
        let mut env = self.boot_env_format.decode(image.data())?;
        env.set_boot_order(devices)?;
        let image = image.with_data(self.boot_env_format.encode(&env)?);

        let priority = u16::max(first.priority, active.priority);
        transfers.upload(&image, first, Some(priority)).await?;
        info!(
            self.log, "boot order set";
            "order" => ?devices,
            "partition" => first.index,
        );
        Ok(())
    }

    /// Basic inventory: controller info, component versions, and card.
    pub async fn info_basic(&self) -> Result<NodeInfo, NodeError> {
        let mut basic = self
            .controller
            .rpc(ControllerRequest::GetInfoBasic)
            .await
            .and_then(expect_info_basic)?;
        basic.ecme_version = format!("v{}", basic.ecme_version);

        let table = self.firmware_info().await?;
        let component_versions = COMPONENT_IMAGE_TYPES
            .into_iter()
            .filter_map(|image_type| {
                select(&table, image_type, PartitionPolicy::Active)
                    .ok()
                    .map(|p| (image_type, p.version))
            })
            .collect();

        let card = match self
            .controller
            .rpc(ControllerRequest::GetInfoCard)
            .await
            .and_then(expect_info_card)
        {
            Ok(card) => format!("{} X{:02}", card.card_type, card.revision),
            Err(err) => {
                warn!(self.log, "failed to get card info"; &err);
                UNKNOWN_CARD.to_string()
            }
        };

        Ok(NodeInfo { basic, component_versions, card })
    }

    /// Addresses of the fabric's nodes, as this node sees them.
    pub async fn fabric_ip_info(
        &self,
    ) -> Result<BTreeMap<NodeId, Ipv4Addr>, NodeError> {
        self.fabric().ip_info().await
    }

    /// MAC addresses of each port of the fabric's nodes, as this node sees
    /// them.
    pub async fn fabric_mac_addresses(
        &self,
    ) -> Result<BTreeMap<NodeId, BTreeMap<u8, MacAddr>>, NodeError> {
        self.fabric().mac_addresses().await
    }
}
