//! # Decoded Meshtastic Records
//!
//! Logical records the transport hands to the state layer after it has decoded
//! the wire protocol, plus the narrow interface the state layer uses to send
//! packets back out. Nothing in here touches serial ports or framing.
//!
//! ## Configuration variants
//!
//! Radio and module configuration arrive as one message per *payload variant*
//! (`device`, `lora`, `mqtt`, ...). The variant's case name is the key used for
//! the pending-change overlay and for sync-progress tracking, so both enums
//! carry an exhaustive name table. Internal variants such as `sessionkey` parse
//! but are not tracked; unknown names do not parse at all.

pub mod admin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::types::{Destination, DeviceStatus, NodeNum};

pub use admin::AdminMessage;

/// Open field map for a configuration payload (`field name -> value`).
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Application port numbers used by outgoing packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PortNum {
    AdminApp = 6,
}

/// Node role as announced in the user record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    Client,
    ClientMute,
    Router,
    RouterClient,
    Repeater,
    Tracker,
    Sensor,
    Tak,
    ClientHidden,
    LostAndFound,
    TakTracker,
}

/// Identity claim broadcast by a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub long_name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub hw_model: i32,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub is_licensed: bool,
    /// Curve25519 public key; empty when the node has not announced one.
    #[serde(default)]
    pub public_key: Vec<u8>,
}

/// Last known geographic fix. Coordinates are degrees * 1e7.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude_i: Option<i32>,
    pub longitude_i: Option<i32>,
    pub altitude: Option<i32>,
    #[serde(default)]
    pub time: u32,
    #[serde(default)]
    pub precision_bits: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub battery_level: Option<u32>,
    pub voltage: Option<f32>,
    pub channel_utilization: Option<f32>,
    pub air_util_tx: Option<f32>,
    pub uptime_seconds: Option<u32>,
}

/// Firmware/hardware summary reported by a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub firmware_version: String,
    #[serde(default)]
    pub device_state_version: u32,
    #[serde(default)]
    pub can_shutdown: bool,
    #[serde(default)]
    pub has_wifi: bool,
    #[serde(default)]
    pub has_bluetooth: bool,
    #[serde(default)]
    pub has_ethernet: bool,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub hw_model: i32,
}

/// Information about the locally attached radio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MyNodeInfo {
    /// The radio's own mesh address; `0` until the radio has identified itself.
    pub my_node_num: NodeNum,
    #[serde(default)]
    pub reboot_count: u32,
    #[serde(default)]
    pub min_app_version: u32,
    #[serde(default)]
    pub pio_env: String,
}

/// Result of a traceroute request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteDiscovery {
    #[serde(default)]
    pub route: Vec<NodeNum>,
    #[serde(default)]
    pub snr_towards: Vec<i32>,
    #[serde(default)]
    pub route_back: Vec<NodeNum>,
    #[serde(default)]
    pub snr_back: Vec<i32>,
}

/// User-placed map marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: u32,
    pub latitude_i: Option<i32>,
    pub longitude_i: Option<i32>,
    /// After this instant the waypoint is stale; `None` never expires.
    pub expire: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locked_to: NodeNum,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: u32,
}

impl Waypoint {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expire, Some(at) if at < now)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelRole {
    #[default]
    Disabled,
    Primary,
    Secondary,
}

/// One slot of the radio's channel table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub index: u32,
    #[serde(default)]
    pub role: ChannelRole,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub psk: Vec<u8>,
    #[serde(default)]
    pub uplink_enabled: bool,
    #[serde(default)]
    pub downlink_enabled: bool,
    #[serde(default)]
    pub position_precision: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub node_id: NodeNum,
    pub snr: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeighborInfo {
    pub node_id: NodeNum,
    #[serde(default)]
    pub last_sent_by_id: NodeNum,
    #[serde(default)]
    pub node_broadcast_interval_secs: u32,
    #[serde(default)]
    pub neighbors: Vec<Neighbor>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

/// Alert raised by the radio for the operator (e.g. a duplicated key warning).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientNotification {
    pub level: NotificationLevel,
    pub message: String,
    pub time: DateTime<Utc>,
    pub reply_id: Option<u32>,
}

/// Radio configuration payload variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RadioVariant {
    Device,
    Position,
    Power,
    Network,
    Display,
    Lora,
    Bluetooth,
    Security,
    Sessionkey,
    DeviceUi,
}

impl RadioVariant {
    pub const ALL: [RadioVariant; 10] = [
        RadioVariant::Device,
        RadioVariant::Position,
        RadioVariant::Power,
        RadioVariant::Network,
        RadioVariant::Display,
        RadioVariant::Lora,
        RadioVariant::Bluetooth,
        RadioVariant::Security,
        RadioVariant::Sessionkey,
        RadioVariant::DeviceUi,
    ];

    pub fn case_name(&self) -> &'static str {
        match self {
            RadioVariant::Device => "device",
            RadioVariant::Position => "position",
            RadioVariant::Power => "power",
            RadioVariant::Network => "network",
            RadioVariant::Display => "display",
            RadioVariant::Lora => "lora",
            RadioVariant::Bluetooth => "bluetooth",
            RadioVariant::Security => "security",
            RadioVariant::Sessionkey => "sessionkey",
            RadioVariant::DeviceUi => "deviceUi",
        }
    }

    pub fn from_case_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.case_name() == name)
    }

    /// `sessionkey` is protocol-internal and never stored or counted.
    pub fn is_tracked(&self) -> bool {
        !matches!(self, RadioVariant::Sessionkey)
    }
}

/// Module configuration payload variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleVariant {
    Mqtt,
    Serial,
    ExternalNotification,
    StoreForward,
    RangeTest,
    Telemetry,
    CannedMessage,
    Audio,
    RemoteHardware,
    NeighborInfo,
    AmbientLighting,
    DetectionSensor,
    Paxcounter,
}

impl ModuleVariant {
    pub const ALL: [ModuleVariant; 13] = [
        ModuleVariant::Mqtt,
        ModuleVariant::Serial,
        ModuleVariant::ExternalNotification,
        ModuleVariant::StoreForward,
        ModuleVariant::RangeTest,
        ModuleVariant::Telemetry,
        ModuleVariant::CannedMessage,
        ModuleVariant::Audio,
        ModuleVariant::RemoteHardware,
        ModuleVariant::NeighborInfo,
        ModuleVariant::AmbientLighting,
        ModuleVariant::DetectionSensor,
        ModuleVariant::Paxcounter,
    ];

    pub fn case_name(&self) -> &'static str {
        match self {
            ModuleVariant::Mqtt => "mqtt",
            ModuleVariant::Serial => "serial",
            ModuleVariant::ExternalNotification => "externalNotification",
            ModuleVariant::StoreForward => "storeForward",
            ModuleVariant::RangeTest => "rangeTest",
            ModuleVariant::Telemetry => "telemetry",
            ModuleVariant::CannedMessage => "cannedMessage",
            ModuleVariant::Audio => "audio",
            ModuleVariant::RemoteHardware => "remoteHardware",
            ModuleVariant::NeighborInfo => "neighborInfo",
            ModuleVariant::AmbientLighting => "ambientLighting",
            ModuleVariant::DetectionSensor => "detectionSensor",
            ModuleVariant::Paxcounter => "paxcounter",
        }
    }

    pub fn from_case_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.case_name() == name)
    }
}

/// A configuration variant of either kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigVariant {
    Radio(RadioVariant),
    Module(ModuleVariant),
}

impl ConfigVariant {
    pub fn is_tracked(&self) -> bool {
        match self {
            ConfigVariant::Radio(v) => v.is_tracked(),
            ConfigVariant::Module(_) => true,
        }
    }

    pub fn case_name(&self) -> &'static str {
        match self {
            ConfigVariant::Radio(v) => v.case_name(),
            ConfigVariant::Module(v) => v.case_name(),
        }
    }

    /// Number of variants that count toward sync progress.
    pub fn tracked_total() -> usize {
        RadioVariant::ALL.iter().filter(|v| v.is_tracked()).count() + ModuleVariant::ALL.len()
    }
}

/// Address of a pending edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeKey {
    Config(RadioVariant),
    ModuleConfig(ModuleVariant),
    Channel(u32),
}

impl ChangeKey {
    /// The configuration variant this key edits, if it is not a channel.
    pub fn variant(&self) -> Option<ConfigVariant> {
        match self {
            ChangeKey::Config(v) => Some(ConfigVariant::Radio(*v)),
            ChangeKey::ModuleConfig(v) => Some(ConfigVariant::Module(*v)),
            ChangeKey::Channel(_) => None,
        }
    }
}

impl From<ConfigVariant> for ChangeKey {
    fn from(variant: ConfigVariant) -> Self {
        match variant {
            ConfigVariant::Radio(v) => ChangeKey::Config(v),
            ConfigVariant::Module(v) => ChangeKey::ModuleConfig(v),
        }
    }
}

/// Per-packet header fields every received packet carries.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PacketMeta {
    pub from: NodeNum,
    /// Receive time in unix seconds; `0` when the radio did not stamp it.
    pub time: u32,
    pub snr: f32,
    pub channel: u32,
    pub via_mqtt: bool,
    pub hops_away: Option<u32>,
}

/// Typed stream of decoded messages from one device's transport.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Status(DeviceStatus),
    HardwareInfo(MyNodeInfo),
    PacketSeen(PacketMeta),
    NodeInfo(crate::node_db::NodeRecord),
    UserInfo { from: NodeNum, user: User },
    Position { from: NodeNum, position: Position },
    Telemetry { from: NodeNum, metrics: DeviceMetrics },
    /// Radio config; `variant` is the payload case name.
    Config { variant: String, value: Fields },
    /// Module config; `variant` is the payload case name.
    ModuleConfig { variant: String, value: Fields },
    Channel(Channel),
    Metadata { from: NodeNum, metadata: DeviceMetadata },
    RouteDiscovered { from: NodeNum, route: RouteDiscovery },
    Waypoint { from: NodeNum, channel: u32, waypoint: Waypoint, rx_time: DateTime<Utc> },
    NeighborInfo { from: NodeNum, info: NeighborInfo },
    ClientNotification(ClientNotification),
}

/// Outgoing half of the device transport.
///
/// Sends are fire-and-forget from the registry's point of view: a returned error
/// is logged, never rolled back.
pub trait Transport: Send {
    /// Queue an encoded payload. Returns the packet id assigned by the transport.
    fn send_packet(
        &self,
        payload: Vec<u8>,
        port: PortNum,
        destination: Destination,
        channel: u32,
    ) -> Result<u32>;

    /// Send a waypoint packet (used to broadcast deletions).
    fn send_waypoint(&self, waypoint: &Waypoint, destination: Destination, channel: u32)
        -> Result<u32>;
}
