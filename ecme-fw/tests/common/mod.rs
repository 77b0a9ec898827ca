// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated management controller backed by an in-memory file transport.

#![allow(dead_code)]

use async_trait::async_trait;
use ecme_fw::error::SessionError;
use ecme_fw::BootEnv;
use ecme_fw::BootEnvFormat;
use ecme_fw::ControllerSession;
use ecme_fw::Image;
use ecme_fw::ImageFormat;
use ecme_fw::InMemoryFileTransport;
use ecme_fw::Node;
use ecme_fw::NodeConfig;
use ecme_fw::SimgFormat;
use ecme_fw::SimgInfo;
use ecme_fw::UbootEnvFormat;
use ecme_fw::BOOTCMD_DEFAULT;
use ecme_messages::ChassisStatus;
use ecme_messages::ControllerError;
use ecme_messages::ControllerRequest;
use ecme_messages::ControllerResponse;
use ecme_messages::FirmwareCheck;
use ecme_messages::FirmwareInfoEntry;
use ecme_messages::ImageType;
use ecme_messages::InUseReport;
use ecme_messages::InfoBasic;
use ecme_messages::InfoCard;
use ecme_messages::PartitionFlags;
use ecme_messages::PartitionInfo;
use ecme_messages::PowerCommand;
use ecme_messages::PowerRestorePolicy;
use ecme_messages::SensorReading;
use ecme_messages::TransferHandle;
use ecme_messages::TransferStatus;
use slog::Drain;
use slog::Logger;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const LOAD_ADDRESS: u32 = 0x0004_0000;
pub const PARTITION_SIZE: u32 = 0x1_0000;

/// Partition layout of a freshly installed node: image type, priority, and
/// whether it's active.
pub const LAYOUT: [(ImageType, u16, bool); 10] = [
    (ImageType::SocElf, 1, true),
    (ImageType::Cdb, 1, false),
    (ImageType::SocElf, 0, false),
    (ImageType::Cdb, 0, false),
    (ImageType::A9Exec, 2, true),
    (ImageType::A9Exec, 1, false),
    (ImageType::UbootEnv, 1, true),
    (ImageType::UbootEnv, 1, false),
    (ImageType::Dtb, 1, true),
    (ImageType::Dtb, 0, false),
];

pub const RUNNING_BOOT_ENV: u8 = 6;
pub const FACTORY_BOOT_ENV: u8 = 7;

pub fn test_logger() -> Logger {
    let decorator =
        slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build();
    let drain = std::sync::Mutex::new(drain).fuse();
    Logger::root(drain, slog::o!())
}

pub fn boot_env(vars: &[(&str, &str)]) -> BootEnv {
    let mut env = BootEnv::new();
    for &(name, value) in vars {
        env.set(name, value).unwrap();
    }
    env
}

pub fn encoded_boot_env(env: &BootEnv) -> Vec<u8> {
    UbootEnvFormat::default().encode(env).unwrap()
}

struct SimPartition {
    info: PartitionInfo,
    data: Vec<u8>,
}

enum SimTransferKind {
    Upload { data: Vec<u8> },
    Download { filename: String },
}

struct SimTransfer {
    partition: usize,
    kind: SimTransferKind,
    polls_left: u32,
}

struct SimState {
    partitions: Vec<SimPartition>,
    transfers: BTreeMap<u32, SimTransfer>,
    next_handle: u32,
    requests: Vec<ControllerRequest>,
    polls_per_transfer: u32,
    stall_transfers: bool,
    bad_crc: BTreeSet<u8>,
    power_on: bool,
    power_restore_policy: PowerRestorePolicy,
    firmware_version: String,
    ecme_version: String,
    reject_firmware_version: bool,
    card: Option<InfoCard>,
    sensors: Vec<SensorReading>,
    ip_info: Option<String>,
    mac_addresses: Option<String>,
}

/// A node's management controller, simulated well enough to drive firmware
/// updates against.
///
/// Transfers take `polls_per_transfer` status polls to complete. An upload
/// takes effect when it completes, with the priority from its image header.
pub struct SimNode {
    addr: IpAddr,
    transport: Arc<InMemoryFileTransport>,
    state: Mutex<SimState>,
}

impl SimNode {
    pub fn new(last_octet: u8) -> Arc<Self> {
        let transport = Arc::new(InMemoryFileTransport::with_capacity(
            "192.168.0.1:69".parse().unwrap(),
            64,
        ));

        let partitions = LAYOUT
            .iter()
            .enumerate()
            .map(|(index, &(image_type, priority, active))| {
                let index = index as u8;
                let payload = if image_type == ImageType::UbootEnv {
                    encoded_boot_env(&boot_env(&[
                        (BOOTCMD_DEFAULT, "run bootcmd_pxe; reset"),
                        ("bootdelay", "3"),
                    ]))
                } else {
                    vec![index; 32]
                };
                let data = SimgFormat
                    .encode(
                        &Image::new(image_type, payload),
                        priority,
                        LOAD_ADDRESS,
                    )
                    .unwrap();
                let in_use = match (image_type, active) {
                    (ImageType::SocElf, true) => InUseReport::Used,
                    (ImageType::SocElf, false) => InUseReport::Unused,
                    _ => InUseReport::Unknown,
                };
                SimPartition {
                    info: PartitionInfo {
                        index,
                        image_type,
                        offset: u32::from(index) * PARTITION_SIZE,
                        size: PARTITION_SIZE,
                        priority,
                        load_address: LOAD_ADDRESS,
                        flags: if active {
                            PartitionFlags::ACTIVE
                        } else {
                            PartitionFlags::empty()
                        },
                        version: u16::from(index) + 100,
                        in_use,
                    },
                    data,
                }
            })
            .collect();

        Arc::new(Self {
            addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)),
            transport,
            state: Mutex::new(SimState {
                partitions,
                transfers: BTreeMap::new(),
                next_handle: 1,
                requests: Vec::new(),
                polls_per_transfer: 1,
                stall_transfers: false,
                bad_crc: BTreeSet::new(),
                power_on: false,
                power_restore_policy: PowerRestorePolicy::AlwaysOff,
                firmware_version: "ECX-1000-v1.5.2".to_string(),
                ecme_version: "1.5.2".to_string(),
                reject_firmware_version: false,
                card: Some(InfoCard {
                    card_type: "EnergyCard".to_string(),
                    revision: 4,
                }),
                sensors: Vec::new(),
                ip_info: None,
                mac_addresses: None,
            }),
        })
    }

    /// A [`Node`] talking to this simulated controller.
    pub fn node(self: &Arc<Self>) -> Node {
        Node::new(Arc::clone(self), self.transport.clone(), &test_logger())
    }

    pub fn node_with_config(self: &Arc<Self>, config: NodeConfig) -> Node {
        self.node().with_config(config)
    }

    pub fn transport(&self) -> &Arc<InMemoryFileTransport> {
        &self.transport
    }

    pub async fn requests(&self) -> Vec<ControllerRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn clear_requests(&self) {
        self.state.lock().await.requests.clear();
    }

    /// Partitions written to, in order.
    pub async fn uploads(&self) -> Vec<u8> {
        self.requests()
            .await
            .into_iter()
            .filter_map(|r| match r {
                ControllerRequest::UpdateFirmware { partition, .. } => {
                    Some(partition)
                }
                _ => None,
            })
            .collect()
    }

    pub async fn set_bad_crc(&self, partition: u8) {
        self.state.lock().await.bad_crc.insert(partition);
    }

    pub async fn set_stall_transfers(&self, stall: bool) {
        self.state.lock().await.stall_transfers = stall;
    }

    pub async fn set_polls_per_transfer(&self, polls: u32) {
        self.state.lock().await.polls_per_transfer = polls;
    }

    /// Fail every `SetFirmwareVersion` request from now on.
    pub async fn set_version_error(&self, fail: bool) {
        self.state.lock().await.reject_firmware_version = fail;
    }

    pub async fn set_firmware_version(&self, version: &str) {
        self.state.lock().await.firmware_version = version.to_string();
    }

    pub async fn set_ecme_version(&self, version: &str) {
        self.state.lock().await.ecme_version = version.to_string();
    }

    pub async fn set_card(&self, card: Option<InfoCard>) {
        self.state.lock().await.card = card;
    }

    pub async fn set_sensors(&self, sensors: &[(&str, &str)]) {
        self.state.lock().await.sensors = sensors
            .iter()
            .map(|&(name, reading)| SensorReading {
                name: name.to_string(),
                reading: reading.to_string(),
            })
            .collect();
    }

    pub async fn set_ip_info(&self, text: &str) {
        self.state.lock().await.ip_info = Some(text.to_string());
    }

    pub async fn set_mac_addresses(&self, text: &str) {
        self.state.lock().await.mac_addresses = Some(text.to_string());
    }

    pub async fn firmware_version(&self) -> String {
        self.state.lock().await.firmware_version.clone()
    }

    pub async fn power_on(&self) -> bool {
        self.state.lock().await.power_on
    }

    pub async fn partition(&self, index: u8) -> PartitionInfo {
        self.state.lock().await.partitions[usize::from(index)].info.clone()
    }

    pub async fn set_partition_priority(&self, index: u8, priority: u16) {
        let mut state = self.state.lock().await;
        let partition = &mut state.partitions[usize::from(index)];
        partition.info.priority = priority;
        partition.data = SimgFormat
            .encode(
                &Image::new(partition.info.image_type, partition.data.clone()),
                priority,
                LOAD_ADDRESS,
            )
            .unwrap();
    }

    /// Activate `index` as though the node had booted from it.
    pub async fn set_active(&self, index: u8) {
        self.state.lock().await.activate(usize::from(index));
    }

    pub async fn header(&self, index: u8) -> SimgInfo {
        let state = self.state.lock().await;
        SimgFormat::inspect(&state.partitions[usize::from(index)].data)
            .unwrap()
    }

    pub async fn payload(&self, index: u8) -> Vec<u8> {
        let state = self.state.lock().await;
        SimgFormat.decode(&state.partitions[usize::from(index)].data).unwrap()
    }

    pub async fn boot_env(&self, index: u8) -> BootEnv {
        UbootEnvFormat::default().decode(&self.payload(index).await).unwrap()
    }

    pub async fn set_boot_env(&self, index: u8, env: &BootEnv) {
        let mut state = self.state.lock().await;
        let partition = &mut state.partitions[usize::from(index)];
        partition.data = SimgFormat
            .encode(
                &Image::new(ImageType::UbootEnv, encoded_boot_env(env)),
                partition.info.priority,
                LOAD_ADDRESS,
            )
            .unwrap();
    }

    async fn respond(&self, request: ControllerRequest) -> ControllerResponse {
        let mut state = self.state.lock().await;
        match request {
            ControllerRequest::GetChassisStatus => {
                ControllerResponse::ChassisStatus(ChassisStatus {
                    power_on: state.power_on,
                    power_restore_policy: state.power_restore_policy,
                })
            }
            ControllerRequest::SetChassisPower(command) => {
                state.power_on = match command {
                    PowerCommand::On | PowerCommand::Reset => true,
                    PowerCommand::Off => false,
                };
                ControllerResponse::SetChassisPowerAck
            }
            ControllerRequest::SetChassisPolicy(policy) => {
                state.power_restore_policy = policy;
                ControllerResponse::SetChassisPolicyAck
            }
            ControllerRequest::McReset => ControllerResponse::McResetAck,
            ControllerRequest::SdrList => {
                ControllerResponse::SdrList(state.sensors.clone())
            }
            ControllerRequest::GetFirmwareInfo => {
                let mut entries: Vec<_> = state
                    .partitions
                    .iter()
                    .map(|p| FirmwareInfoEntry::Partition(p.info.clone()))
                    .collect();
                entries.push(FirmwareInfoEntry::Other {
                    label: "Partitions: 10".to_string(),
                });
                ControllerResponse::FirmwareInfo(entries)
            }
            ControllerRequest::UpdateFirmware { filename, partition, .. } => {
                // Lock order: state, then transport.
                let Some(data) = self.transport.get(&filename).await else {
                    return error(0xcc, "file not found");
                };
                state.start_transfer(
                    partition,
                    SimTransferKind::Upload { data },
                )
            }
            ControllerRequest::RetrieveFirmware {
                filename, partition, ..
            } => {
                let started = state.start_transfer(
                    partition,
                    SimTransferKind::Download { filename: filename.clone() },
                );
                // The file exists, empty, from the moment the controller
                // starts writing it.
                if matches!(
                    started,
                    ControllerResponse::FirmwareTransferStarted { .. }
                ) {
                    self.transport.insert(filename, Vec::new()).await;
                }
                started
            }
            ControllerRequest::GetFirmwareStatus(TransferHandle(handle)) => {
                if state.stall_transfers {
                    return firmware_status(TransferStatus::InProgress);
                }
                let Some(transfer) = state.transfers.get_mut(&handle) else {
                    return error(0xcb, "no such transfer");
                };
                if transfer.polls_left > 0 {
                    transfer.polls_left -= 1;
                    return firmware_status(TransferStatus::InProgress);
                }
                let Some(transfer) = state.transfers.remove(&handle) else {
                    return error(0xcb, "no such transfer");
                };
                match transfer.kind {
                    SimTransferKind::Upload { data } => {
                        let p = &mut state.partitions[transfer.partition];
                        if let Some(header) = SimgFormat::inspect(&data) {
                            p.info.priority = header.priority;
                        }
                        p.data = data;
                    }
                    SimTransferKind::Download { filename } => {
                        let data = state.partitions[transfer.partition]
                            .data
                            .clone();
                        self.transport.insert(filename, data).await;
                    }
                }
                firmware_status(TransferStatus::Complete)
            }
            ControllerRequest::CheckFirmware { partition } => {
                let crc32 = crc32fast::hash(
                    &state.partitions[usize::from(partition)].data,
                );
                if state.bad_crc.contains(&partition) {
                    ControllerResponse::FirmwareCheck(FirmwareCheck {
                        partition,
                        crc32: None,
                        error: Some("CRC32 mismatch".to_string()),
                    })
                } else {
                    ControllerResponse::FirmwareCheck(FirmwareCheck {
                        partition,
                        crc32: Some(crc32),
                        error: None,
                    })
                }
            }
            ControllerRequest::ActivateFirmware { partition } => {
                state.activate(usize::from(partition));
                ControllerResponse::ActivateFirmwareAck
            }
            ControllerRequest::ResetFirmware => {
                ControllerResponse::ResetFirmwareAck
            }
            ControllerRequest::SelClear => ControllerResponse::SelClearAck,
            ControllerRequest::SetFirmwareVersion { version } => {
                if state.reject_firmware_version {
                    return error(0xd5, "command not supported");
                }
                state.firmware_version = version;
                ControllerResponse::SetFirmwareVersionAck
            }
            ControllerRequest::GetFabricIpInfo { filename, .. } => {
                if let Some(text) = state.ip_info.clone() {
                    self.transport.insert(filename, text.into_bytes()).await;
                }
                ControllerResponse::FabricInfoAck
            }
            ControllerRequest::GetFabricMacAddresses { filename, .. } => {
                if let Some(text) = state.mac_addresses.clone() {
                    self.transport.insert(filename, text.into_bytes()).await;
                }
                ControllerResponse::FabricInfoAck
            }
            ControllerRequest::GetInfoBasic => {
                ControllerResponse::InfoBasic(InfoBasic {
                    iana: 0x0096cd,
                    firmware_version: state.firmware_version.clone(),
                    ecme_version: state.ecme_version.clone(),
                    build_number: "A69523DC".to_string(),
                    timestamp: 1_351_543_656,
                })
            }
            ControllerRequest::GetInfoCard => match state.card.clone() {
                Some(card) => ControllerResponse::InfoCard(card),
                None => error(0xc1, "invalid command"),
            },
        }
    }
}

impl SimState {
    fn start_transfer(
        &mut self,
        partition: u8,
        kind: SimTransferKind,
    ) -> ControllerResponse {
        let partition = usize::from(partition);
        if partition >= self.partitions.len() {
            return error(0xc9, "parameter out of range");
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.transfers.insert(
            handle,
            SimTransfer {
                partition,
                kind,
                polls_left: self.polls_per_transfer,
            },
        );
        ControllerResponse::FirmwareTransferStarted {
            handle: Some(TransferHandle(handle)),
        }
    }

    fn activate(&mut self, index: usize) {
        let image_type = self.partitions[index].info.image_type;
        for (i, p) in self.partitions.iter_mut().enumerate() {
            if p.info.image_type != image_type {
                continue;
            }
            if i == index {
                p.info.flags.insert(PartitionFlags::ACTIVE);
                p.info.in_use = InUseReport::Used;
            } else {
                p.info.flags.remove(PartitionFlags::ACTIVE);
                if image_type != ImageType::Cdb {
                    p.info.in_use = InUseReport::Unused;
                }
            }
        }
    }
}

fn error(completion_code: u8, message: &str) -> ControllerResponse {
    ControllerResponse::Error(ControllerError {
        completion_code,
        message: message.to_string(),
    })
}

fn firmware_status(status: TransferStatus) -> ControllerResponse {
    ControllerResponse::FirmwareStatus { status: Some(status) }
}

#[async_trait]
impl ControllerSession for SimNode {
    fn address(&self) -> IpAddr {
        self.addr
    }

    async fn call(
        &self,
        request: ControllerRequest,
    ) -> Result<ControllerResponse, SessionError> {
        self.state.lock().await.requests.push(request.clone());
        Ok(self.respond(request).await)
    }
}
