//! Small identifiers and enums shared by the registry, its records and the service loop.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::logutil::node_label;

/// Mesh address of a node.
pub type NodeNum = u32;

/// Broadcast address used by Meshtastic radios.
pub const BROADCAST_NUM: NodeNum = 0xFFFF_FFFF;

/// Opaque identifier of one device connection session.
///
/// Distinct from the radio's own node number: a radio that reconnects gets a new
/// session id but keeps its `my_node_num`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Fresh random session id.
    pub fn random() -> Self {
        DeviceId(rand::thread_rng().gen_range(1..=u32::MAX))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(value: u32) -> Self {
        DeviceId(value)
    }
}

/// Connection state of a device session as reported by the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    #[default]
    Disconnected,
    Connecting,
    Reconnecting,
    Connected,
    Configuring,
    Configured,
}

/// Where an outgoing packet is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// The locally attached radio itself.
    SelfNode,
    /// A specific remote node.
    Node(NodeNum),
    /// Every node on the channel.
    Broadcast,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::SelfNode => f.write_str("self"),
            Destination::Node(n) => f.write_str(&node_label(*n)),
            Destination::Broadcast => write!(f, "broadcast ({})", node_label(BROADCAST_NUM)),
        }
    }
}

/// A chat thread for unread counters and drafts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Direct(NodeNum),
    Channel(u32),
}
