// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! This crate updates and inspects the firmware of compute nodes through
//! their management controllers.
//!
//! The primary entry point is [`Node`]. How requests reach a controller is
//! up to the caller's [`ControllerSession`]; images travel between us and
//! the controller over a [`FileTransport`].

mod boot_env;
mod config;
mod controller;
mod fabric;
mod file_transport;
mod image;
mod node;
mod orchestrator;
mod partition;
mod priority;
mod response_expect;
mod selector;
mod transfer;

pub mod error;

pub use boot_env::BootDevice;
pub use boot_env::BootEnv;
pub use boot_env::BootEnvFormat;
pub use boot_env::UbootEnvFormat;
pub use boot_env::BOOTCMD_DEFAULT;
pub use config::NodeConfig;
pub use controller::ControllerSession;
pub use fabric::parse_ip_info;
pub use fabric::parse_mac_addresses;
pub use fabric::MacAddr;
pub use fabric::NodeId;
pub use file_transport::DirectoryFileTransport;
pub use file_transport::FileTransport;
pub use file_transport::InMemoryFileTransport;
pub use image::ConfigClass;
pub use image::FirmwarePackage;
pub use image::Image;
pub use image::ImageFormat;
pub use image::SimgFormat;
pub use image::SimgInfo;
pub use node::Node;
pub use node::NodeInfo;
pub use orchestrator::check_readiness;
pub use orchestrator::plan_update;
pub use orchestrator::PlannedWrite;
pub use orchestrator::UpdatePlan;
pub use orchestrator::UpdateReport;
pub use orchestrator::WriteKind;
pub use orchestrator::WrittenPartition;
pub use partition::InUse;
pub use partition::Partition;
pub use partition::PartitionTable;
pub use priority::next_priority;
pub use priority::next_version;
pub use selector::select;
pub use selector::select_all;
pub use selector::PartitionPolicy;
