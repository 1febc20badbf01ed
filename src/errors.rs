use thiserror::Error;

use crate::types::DeviceId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors raised by the device/node state layer.
#[derive(Debug, Error)]
pub enum StateError {
    /// No device record is registered under this session id.
    #[error("no device with id {0}")]
    DeviceNotFound(DeviceId),

    /// The node database owned by this session was removed or merged away.
    #[error("no node database for key {0}")]
    NodeDatabaseNotFound(DeviceId),

    /// Node number is not present in the node database.
    #[error("node not found: !{0:08x}")]
    NodeNotFound(u32),

    /// Waypoint id is not present on the device.
    #[error("waypoint not found: {0}")]
    WaypointNotFound(u32),

    /// Channel index outside the radio's channel table.
    #[error("invalid channel index {0} (must be 0-7)")]
    InvalidChannel(u32),

    /// No transport attached to the device session.
    #[error("device {0} has no transport attached")]
    NotConnected(DeviceId),

    /// Failure reported synchronously by the transport collaborator.
    #[error("transport error: {0}")]
    Transport(String),

    /// Wrapper around sled's error type.
    #[cfg(feature = "persistence")]
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around JSON serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when loading a snapshot written with an unknown schema version.
    #[error("schema mismatch: expected {expected}, got {found}")]
    SchemaMismatch { expected: u8, found: u8 },
}
