//! # Meshpanel - Device & Node State for Meshtastic Control Panels
//!
//! Meshpanel is the state layer behind a Meshtastic control panel. It keeps
//! an authoritative, bounded, persistable model of every radio the panel has
//! talked to and of the mesh each radio can see.
//!
//! ## Features
//!
//! - **Device Sessions**: One record per connection with hardware identity, config, traceroutes, waypoints and admin queue.
//! - **Reconnect Merge**: A radio that comes back under a new session keeps its node history; conflicting public keys are flagged, never silently replaced.
//! - **Config Overlay**: Confirmed config and pending edits are held apart; readers see the merged effective value.
//! - **Retention Caps**: Devices, node databases, traceroutes and waypoints are capped with oldest-first eviction.
//! - **Persistence**: Snapshots go to an embedded sled store; sessions that never identified are pruned on load.
//! - **Change Notification**: Debounced selector subscriptions for UI consumers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use meshpanel::protocol::{InboundEvent, MyNodeInfo};
//! use meshpanel::registry::DeviceRegistry;
//! use meshpanel::retention::RetentionConfig;
//! use meshpanel::types::DeviceId;
//!
//! fn main() -> meshpanel::errors::Result<()> {
//!     let mut registry = DeviceRegistry::new(RetentionConfig::default());
//!     let id = DeviceId::random();
//!     registry.add_device(id);
//!     registry.apply(
//!         id,
//!         InboundEvent::HardwareInfo(MyNodeInfo { my_node_num: 0x1234_5678, ..Default::default() }),
//!         Utc::now(),
//!     )?;
//!     println!("{}", registry.describe_device(id)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`registry`] - the aggregate root and identity resolution
//! - [`device`] - per-session record: traceroutes, waypoints, admin messages
//! - [`node_db`] - per-device node database and reconnect merge
//! - [`overlay`] - baseline config plus pending edits
//! - [`retention`] - capped map and capped log
//! - [`persistence`] - snapshot projection and stores
//! - [`notifier`] - debounced subscriptions
//! - [`service`] - tokio task that owns the registry
//! - [`protocol`] - decoded records, admin codec, transport trait
//! - [`config`] - TOML configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   SyncService   │ ← event loop, debounce timers
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ DeviceRegistry  │ ← devices + node databases (capped)
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   StateStore    │ ← sled / memory snapshots
//! └─────────────────┘
//! ```

pub mod config;
pub mod device;
pub mod errors;
pub mod logutil;
pub mod metrics;
pub mod node_db;
pub mod notifier;
pub mod overlay;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod retention;
pub mod service;
pub mod types;
