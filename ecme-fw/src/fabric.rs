// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What one node knows about the addresses of the rest of its fabric.
//!
//! The controller writes these tables to the file transport rather than
//! returning them, so we ask for a table and then wait for it to show up.

use crate::config::NodeConfig;
use crate::controller::Controller;
use crate::error::NodeError;
use crate::file_transport::discard;
use crate::file_transport::FileTransport;
use crate::response_expect::expect_fabric_info_ack;
use ecme_messages::ControllerRequest;
use slog::debug;
use slog::Logger;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::str::FromStr;
use uuid::Uuid;

/// Fabric node ID.
pub type NodeId = u32;

/// A fabric port's MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub macaddr::MacAddr6);

impl FromStr for MacAddr {
    type Err = macaddr::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(MacAddr)
    }
}

impl std::ops::Deref for MacAddr {
    type Target = macaddr::MacAddr6;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse `Node <id>: <ipv4>` lines. Nodes reporting `0.0.0.0` have no
/// address yet and are left out.
pub fn parse_ip_info(text: &str) -> BTreeMap<NodeId, Ipv4Addr> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            if fields.next() != Some("Node") {
                return None;
            }
            let id = fields.next()?.trim_end_matches(':');
            let id: NodeId = id.parse().ok()?;
            let ip: Ipv4Addr = fields.next()?.parse().ok()?;
            (!ip.is_unspecified()).then_some((id, ip))
        })
        .collect()
}

/// Parse `Node <id>, Port <port>: <mac>` lines.
pub fn parse_mac_addresses(
    text: &str,
) -> BTreeMap<NodeId, BTreeMap<u8, MacAddr>> {
    let mut nodes: BTreeMap<NodeId, BTreeMap<u8, MacAddr>> = BTreeMap::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let ["Node", id, "Port", port, mac] = fields[..] else {
            continue;
        };
        let (Ok(id), Ok(port), Ok(mac)) = (
            id.trim_end_matches(',').parse::<NodeId>(),
            port.trim_end_matches(':').parse::<u8>(),
            mac.parse::<MacAddr>(),
        ) else {
            continue;
        };
        nodes.entry(id).or_default().insert(port, mac);
    }
    nodes
}

pub(crate) struct FabricQuery<'a> {
    pub(crate) controller: &'a Controller,
    pub(crate) transport: &'a dyn FileTransport,
    pub(crate) config: &'a NodeConfig,
    pub(crate) log: &'a Logger,
}

impl FabricQuery<'_> {
    pub(crate) async fn ip_info(
        &self,
    ) -> Result<BTreeMap<NodeId, Ipv4Addr>, NodeError> {
        let text = self
            .fetch(|filename, transport_addr| {
                ControllerRequest::GetFabricIpInfo { filename, transport_addr }
            })
            .await?;
        let nodes = parse_ip_info(&text);
        if nodes.is_empty() {
            return Err(NodeError::NoIpInfo);
        }
        Ok(nodes)
    }

    pub(crate) async fn mac_addresses(
        &self,
    ) -> Result<BTreeMap<NodeId, BTreeMap<u8, MacAddr>>, NodeError> {
        let text = self
            .fetch(|filename, transport_addr| {
                ControllerRequest::GetFabricMacAddresses {
                    filename,
                    transport_addr,
                }
            })
            .await?;
        let nodes = parse_mac_addresses(&text);
        if nodes.is_empty() {
            return Err(NodeError::NoMacAddress);
        }
        Ok(nodes)
    }

    /// Ask the controller to write a table to the file transport, then wait
    /// for it to arrive. A table that never shows up reads as empty.
    ///
    /// The table file is removed from the transport either way.
    async fn fetch<F>(&self, request: F) -> Result<String, NodeError>
    where
        F: FnOnce(String, SocketAddr) -> ControllerRequest,
    {
        let node = self.controller.address();
        let transport_addr = self.transport.advertised_addr(node).await?;
        let filename = format!("{node}-fabric-{}.txt", Uuid::new_v4());
        self.controller
            .rpc(request(filename.clone(), transport_addr))
            .await
            .and_then(expect_fabric_info_ack)?;

        for attempt in 1..=self.config.fabric_fetch_attempts {
            tokio::time::sleep(self.config.fabric_fetch_interval).await;
            match self.transport.receive(&filename).await {
                Ok(data) if !data.is_empty() => {
                    discard(self.transport, &filename, self.log).await;
                    return Ok(String::from_utf8_lossy(&data).into_owned());
                }
                Ok(_) => {
                    debug!(
                        self.log, "fabric table is still empty";
                        "filename" => &filename,
                        "attempt" => attempt,
                    );
                }
                Err(err) => {
                    debug!(
                        self.log, "fabric table not available yet";
                        "filename" => &filename,
                        "attempt" => attempt,
                        &err,
                    );
                }
            }
        }
        discard(self.transport, &filename, self.log).await;
        Ok(String::new())
    }
}
