//! Events exchanged over the controller bus and the inbound feed format.

use std::net::Ipv4Addr;

use bier_orch_common::BusEvent;
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

pub const SWITCH_CONNECTED: &str = "switch_connected";
pub const TOPOLOGY_PACKET_IN: &str = "topology_packet_in";
pub const TOPOLOGY_CHANGE: &str = "topology_change";
pub const IGMP_PACKET_IN: &str = "igmp_packet_in";
pub const GROUP_UPDATE: &str = "group_update";
pub const PORT_MESSAGE: &str = "port_message";

/// A neighbour announcement seen by `switch` on `port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyPacket {
    pub switch: String,
    pub name: String,
    pub port: u32,
    pub ip: Ipv4Addr,
    pub mac: String,
}

/// Describes what changed in the topology.
///
/// Port updates carry `port_update = true` so controllers can apply the
/// configured settle delay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyChange {
    pub src_device: Option<String>,
    pub dst_device: Option<String>,
    pub port: Option<u32>,
    pub port_update: bool,
}

impl TopologyChange {
    pub fn adjacency(src: &str, dst: &str, port: u32) -> Self {
        Self {
            src_device: Some(src.to_string()),
            dst_device: Some(dst.to_string()),
            port: Some(port),
            port_update: false,
        }
    }

    pub fn port_update(switch: &str, port: u32) -> Self {
        Self {
            src_device: Some(switch.to_string()),
            dst_device: None,
            port: Some(port),
            port_update: true,
        }
    }
}

/// IGMP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgmpType {
    Join,
    Leave,
}

impl TryFrom<u8> for IgmpType {
    type Error = ControllerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x16 => Ok(IgmpType::Join),
            0x17 => Ok(IgmpType::Leave),
            other => Err(ControllerError::InvalidPacket(format!(
                "unsupported IGMP type {:#04x}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgmpPacket {
    pub switch: String,
    pub igmp_type: IgmpType,
    pub mc_address: Ipv4Addr,
    pub src_ip: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMessage {
    pub switch: String,
    pub port: u32,
    pub up: bool,
}

/// Everything that travels over the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    SwitchConnected { name: String },
    TopologyPacketIn(TopologyPacket),
    TopologyChange(TopologyChange),
    IgmpPacketIn(IgmpPacket),
    GroupUpdate,
    PortMessage(PortMessage),
}

impl BusEvent for ControlEvent {
    fn name(&self) -> &'static str {
        match self {
            ControlEvent::SwitchConnected { .. } => SWITCH_CONNECTED,
            ControlEvent::TopologyPacketIn(_) => TOPOLOGY_PACKET_IN,
            ControlEvent::TopologyChange(_) => TOPOLOGY_CHANGE,
            ControlEvent::IgmpPacketIn(_) => IGMP_PACKET_IN,
            ControlEvent::GroupUpdate => GROUP_UPDATE,
            ControlEvent::PortMessage(_) => PORT_MESSAGE,
        }
    }
}

/// One line of the JSON event feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Topology(TopologyPacket),
    Igmp {
        switch: String,
        igmp_type: u8,
        mc_address: Ipv4Addr,
        src_ip: Ipv4Addr,
    },
    Port(PortMessage),
}

impl FeedMessage {
    /// Port number the message refers to, if any.
    pub fn port(&self) -> Option<u32> {
        match self {
            FeedMessage::Topology(packet) => Some(packet.port),
            FeedMessage::Port(msg) => Some(msg.port),
            FeedMessage::Igmp { .. } => None,
        }
    }
}

impl TryFrom<FeedMessage> for ControlEvent {
    type Error = ControllerError;

    fn try_from(msg: FeedMessage) -> Result<Self, Self::Error> {
        Ok(match msg {
            FeedMessage::Topology(packet) => ControlEvent::TopologyPacketIn(packet),
            FeedMessage::Igmp {
                switch,
                igmp_type,
                mc_address,
                src_ip,
            } => ControlEvent::IgmpPacketIn(IgmpPacket {
                switch,
                igmp_type: IgmpType::try_from(igmp_type)?,
                mc_address,
                src_ip,
            }),
            FeedMessage::Port(port) => ControlEvent::PortMessage(port),
        })
    }
}
