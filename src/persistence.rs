//! # Snapshot Persistence
//!
//! A reduced projection of the registry is written to durable storage and read
//! back on startup. Live transports, pending edits, unread counters and other
//! session-only state are not part of the projection.
//!
//! On restore every device whose `my_node_num` was never learned, and every node
//! database without one, is dropped as an orphan.
//!
//! Two [`StateStore`] implementations are provided: [`SledStore`] (embedded
//! key-value tree, one key per device and per node database, written as one
//! atomic batch) and [`MemoryStore`] for tests and throwaway sessions.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::device::{DeviceRecord, StoredWaypoint, TracerouteEntry};
use crate::errors::{Result, StateError};
use crate::metrics;
use crate::node_db::{NodeDatabase, NodeError, NodeRecord};
use crate::protocol::{
    Channel, ConfigVariant, DeviceMetadata, Fields, ModuleVariant, MyNodeInfo, RadioVariant,
};
use crate::registry::DeviceRegistry;
use crate::retention::RetentionConfig;
use crate::types::{DeviceId, NodeNum};

/// Bumped whenever the persisted layout changes incompatibly.
pub const SNAPSHOT_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema_version: u8,
    #[serde(default)]
    pub current: Option<DeviceId>,
    /// Oldest first, so reinsertion reproduces the eviction order.
    #[serde(default)]
    pub devices: Vec<PersistedDevice>,
    #[serde(default)]
    pub node_databases: Vec<PersistedNodeDatabase>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            current: None,
            devices: Vec::new(),
            node_databases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTraceroutes {
    pub target: NodeNum,
    pub entries: Vec<TracerouteEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedDevice {
    pub id: DeviceId,
    pub hardware: MyNodeInfo,
    /// Radio config baselines by case name.
    #[serde(default)]
    pub config: BTreeMap<String, Fields>,
    /// Module config baselines by case name.
    #[serde(default)]
    pub module_config: BTreeMap<String, Fields>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub metadata: BTreeMap<NodeNum, DeviceMetadata>,
    #[serde(default)]
    pub traceroutes: Vec<PersistedTraceroutes>,
    #[serde(default)]
    pub waypoints: Vec<StoredWaypoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedNodeDatabase {
    pub device: DeviceId,
    pub my_node_num: Option<NodeNum>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub node_errors: Vec<NodeError>,
}

/// Counts from [`DeviceRegistry::restore`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    pub devices: usize,
    pub node_databases: usize,
    pub orphan_devices: usize,
    pub orphan_node_databases: usize,
}

impl RestoreReport {
    pub fn orphans(&self) -> usize {
        self.orphan_devices + self.orphan_node_databases
    }
}

impl PersistedDevice {
    fn capture(device: &DeviceRecord) -> Self {
        let mut config = BTreeMap::new();
        let mut module_config = BTreeMap::new();
        for (variant, value) in device.overlay().baselines() {
            match variant {
                ConfigVariant::Radio(v) => config.insert(v.case_name().to_string(), value.clone()),
                ConfigVariant::Module(v) => {
                    module_config.insert(v.case_name().to_string(), value.clone())
                }
            };
        }
        Self {
            id: device.id(),
            hardware: device.hardware().clone(),
            config,
            module_config,
            channels: device.overlay().channels().cloned().collect(),
            metadata: device
                .metadata()
                .map(|(num, meta)| (*num, meta.clone()))
                .collect(),
            traceroutes: device
                .traceroutes()
                .map(|(target, log)| PersistedTraceroutes {
                    target: *target,
                    entries: log.iter().cloned().collect(),
                })
                .collect(),
            waypoints: device.waypoints().cloned().collect(),
        }
    }

    fn rebuild(self, retention: RetentionConfig) -> Result<DeviceRecord> {
        let mut device = DeviceRecord::new(self.id, retention);
        device.set_hardware_info(self.hardware);
        for (name, value) in self.config {
            match RadioVariant::from_case_name(&name) {
                Some(v) => device.set_config(ConfigVariant::Radio(v), value),
                None => debug!("Skipping persisted config {:?} for device {}", name, self.id),
            }
        }
        for (name, value) in self.module_config {
            match ModuleVariant::from_case_name(&name) {
                Some(v) => device.set_config(ConfigVariant::Module(v), value),
                None => debug!("Skipping persisted module config {:?} for device {}", name, self.id),
            }
        }
        // progress describes the live session, not what was cached
        device.overlay_mut().reset_progress();
        for channel in self.channels {
            device.add_channel(channel)?;
        }
        for (num, meta) in self.metadata {
            device.add_metadata(num, meta);
        }
        for group in self.traceroutes {
            for entry in group.entries {
                device.restore_traceroute(group.target, entry);
            }
        }
        for waypoint in self.waypoints {
            device.restore_waypoint(waypoint);
        }
        Ok(device)
    }
}

impl DeviceRegistry {
    /// Capture the persistable projection of every device and node database.
    pub fn snapshot(&self) -> PersistedState {
        PersistedState {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            current: self.current,
            devices: self
                .devices
                .iter()
                .map(|(_, device)| PersistedDevice::capture(device))
                .collect(),
            node_databases: self
                .node_dbs
                .iter()
                .map(|(id, db)| PersistedNodeDatabase {
                    device: *id,
                    my_node_num: db.my_node_num(),
                    nodes: db.nodes().cloned().collect(),
                    node_errors: db.node_errors().cloned().collect(),
                })
                .collect(),
        }
    }

    /// Rebuild a registry from a snapshot, pruning orphan records.
    pub fn restore(state: PersistedState, retention: RetentionConfig) -> Result<(Self, RestoreReport)> {
        if state.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(StateError::SchemaMismatch {
                expected: SNAPSHOT_SCHEMA_VERSION,
                found: state.schema_version,
            });
        }
        let mut registry = DeviceRegistry::new(retention);
        let mut report = RestoreReport::default();

        for persisted in state.devices {
            if persisted.hardware.my_node_num == 0 {
                debug!("Dropping orphan device {}", persisted.id);
                report.orphan_devices += 1;
                continue;
            }
            let id = persisted.id;
            let device = persisted.rebuild(retention)?;
            registry.devices.insert(id, device);
        }

        for persisted in state.node_databases {
            let Some(my_node_num) = persisted.my_node_num.filter(|n| *n != 0) else {
                debug!("Dropping orphan node database {}", persisted.device);
                report.orphan_node_databases += 1;
                continue;
            };
            if !registry.devices.contains_key(&persisted.device) {
                debug!(
                    "Dropping node database {} with no surviving device",
                    persisted.device
                );
                report.orphan_node_databases += 1;
                continue;
            }
            let db = NodeDatabase::from_parts(
                Some(my_node_num),
                persisted.nodes,
                persisted.node_errors,
            );
            registry.node_dbs.insert(persisted.device, db);
        }

        registry.current = state.current.filter(|id| registry.devices.contains_key(id));
        report.devices = registry.devices.len();
        report.node_databases = registry.node_dbs.len();
        if report.orphans() > 0 {
            metrics::add_orphans_pruned(report.orphans());
        }
        info!(
            "Restored {} device(s), {} node database(s); pruned {} orphan(s)",
            report.devices,
            report.node_databases,
            report.orphans()
        );
        Ok((registry, report))
    }
}

/// Durable home for registry snapshots.
pub trait StateStore: Send {
    /// Replace the stored snapshot as one unit.
    fn save(&self, state: &PersistedState) -> Result<()>;

    /// `None` when nothing has been saved yet.
    fn load(&self) -> Result<Option<PersistedState>>;
}

/// Save `registry` into `store`.
pub fn save_registry(store: &dyn StateStore, registry: &DeviceRegistry) -> Result<()> {
    store.save(&registry.snapshot())
}

/// Load a registry from `store`; an empty store yields an empty registry.
pub fn load_registry(
    store: &dyn StateStore,
    retention: RetentionConfig,
) -> Result<(DeviceRegistry, RestoreReport)> {
    match store.load()? {
        Some(state) => DeviceRegistry::restore(state, retention),
        None => Ok((DeviceRegistry::new(retention), RestoreReport::default())),
    }
}

/// In-memory store holding the last snapshot as JSON bytes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn save(&self, state: &PersistedState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(bytes);
        metrics::inc_snapshots_saved();
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>> {
        let slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slot.as_deref() {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(feature = "persistence")]
pub use sled_store::SledStore;

#[cfg(feature = "persistence")]
mod sled_store {
    use std::path::Path;

    use log::debug;
    use sled::IVec;

    use super::{PersistedDevice, PersistedNodeDatabase, PersistedState, StateStore, SNAPSHOT_SCHEMA_VERSION};
    use crate::errors::{Result, StateError};
    use crate::metrics;
    use crate::types::DeviceId;

    const TREE_STATE: &str = "meshpanel_state";
    const SCHEMA_KEY: &[u8] = b"meta:schema_version";
    const CURRENT_KEY: &[u8] = b"meta:current_device";
    const DEVICE_PREFIX: &str = "devices:";
    const NODEDB_PREFIX: &str = "nodedb:";

    /// Sled-backed snapshot store.
    pub struct SledStore {
        _db: sled::Db,
        tree: sled::Tree,
    }

    impl SledStore {
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
            let path_ref = path.as_ref();
            std::fs::create_dir_all(path_ref)?;
            let db = sled::open(path_ref)?;
            let tree = db.open_tree(TREE_STATE)?;
            Ok(Self { _db: db, tree })
        }

        // position prefix keeps scan order equal to eviction order
        fn device_key(position: usize, id: DeviceId) -> Vec<u8> {
            format!("{}{:04}:{}", DEVICE_PREFIX, position, id).into_bytes()
        }

        fn nodedb_key(position: usize, id: DeviceId) -> Vec<u8> {
            format!("{}{:04}:{}", NODEDB_PREFIX, position, id).into_bytes()
        }

        fn deserialize<T: serde::de::DeserializeOwned>(bytes: IVec) -> Result<T> {
            Ok(serde_json::from_slice(&bytes)?)
        }

        fn scan<T: serde::de::DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
            let mut out = Vec::new();
            for entry in self.tree.scan_prefix(prefix.as_bytes()) {
                let (_, value) = entry?;
                out.push(Self::deserialize(value)?);
            }
            Ok(out)
        }
    }

    impl StateStore for SledStore {
        fn save(&self, state: &PersistedState) -> Result<()> {
            let mut batch = sled::Batch::default();
            for prefix in [DEVICE_PREFIX, NODEDB_PREFIX] {
                for entry in self.tree.scan_prefix(prefix.as_bytes()) {
                    let (key, _) = entry?;
                    batch.remove(key);
                }
            }
            for (position, device) in state.devices.iter().enumerate() {
                batch.insert(
                    Self::device_key(position, device.id),
                    serde_json::to_vec(device)?,
                );
            }
            for (position, db) in state.node_databases.iter().enumerate() {
                batch.insert(Self::nodedb_key(position, db.device), serde_json::to_vec(db)?);
            }
            batch.insert(SCHEMA_KEY, &[state.schema_version][..]);
            batch.insert(CURRENT_KEY, serde_json::to_vec(&state.current)?);
            self.tree.apply_batch(batch)?;
            self.tree.flush()?;
            metrics::inc_snapshots_saved();
            debug!(
                "Saved snapshot: {} device(s), {} node database(s)",
                state.devices.len(),
                state.node_databases.len()
            );
            Ok(())
        }

        fn load(&self) -> Result<Option<PersistedState>> {
            let Some(schema) = self.tree.get(SCHEMA_KEY)? else {
                return Ok(None);
            };
            let found = schema.first().copied().unwrap_or(0);
            if found != SNAPSHOT_SCHEMA_VERSION {
                return Err(StateError::SchemaMismatch {
                    expected: SNAPSHOT_SCHEMA_VERSION,
                    found,
                });
            }
            let current = match self.tree.get(CURRENT_KEY)? {
                Some(bytes) => Self::deserialize(bytes)?,
                None => None,
            };
            let devices: Vec<PersistedDevice> = self.scan(DEVICE_PREFIX)?;
            let node_databases: Vec<PersistedNodeDatabase> = self.scan(NODEDB_PREFIX)?;
            Ok(Some(PersistedState {
                schema_version: found,
                current,
                devices,
                node_databases,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RouteDiscovery, User, Waypoint};
    use chrono::Utc;
    use serde_json::json;

    fn identified(reg: &mut DeviceRegistry, id: u32, num: NodeNum) {
        reg.add_device(DeviceId(id));
        reg.set_hardware(
            DeviceId(id),
            MyNodeInfo {
                my_node_num: num,
                ..Default::default()
            },
            Utc::now(),
        )
        .expect("hardware");
    }

    #[test]
    fn orphan_devices_are_pruned_on_restore() {
        let mut reg = DeviceRegistry::default();
        identified(&mut reg, 1, 0x1111);
        reg.node_db_mut(DeviceId(1))
            .expect("db")
            .add_user(5, User::default());
        reg.add_device(DeviceId(2));
        reg.add_node_database(DeviceId(2)).expect("db").add_user(6, User::default());

        let (restored, report) =
            DeviceRegistry::restore(reg.snapshot(), RetentionConfig::default()).expect("restore");
        assert_eq!(report.orphan_devices, 1);
        assert_eq!(report.orphan_node_databases, 1);
        assert!(restored.device(DeviceId(2)).is_err());
        let db = restored.node_db(DeviceId(1)).expect("db");
        assert_eq!(db.my_node_num(), Some(0x1111));
        assert!(db.get_node(5).is_some());
    }

    #[test]
    fn restore_keeps_history_and_config_but_not_pending_edits() {
        let mut reg = DeviceRegistry::default();
        identified(&mut reg, 3, 0x2222);
        let now = Utc::now();
        let lora = ConfigVariant::Radio(RadioVariant::Lora);
        {
            let device = reg.device_mut(DeviceId(3)).expect("device");
            device.set_config(lora, json!({"region": "US"}).as_object().cloned().expect("obj"));
            device
                .overlay_mut()
                .set_change(lora.into(), Fields::new())
                .expect("stage");
            device.add_traceroute(9, RouteDiscovery::default(), now);
            device.add_waypoint(
                Waypoint {
                    id: 77,
                    ..Default::default()
                },
                9,
                0,
                now,
            );
        }

        let (restored, _) =
            DeviceRegistry::restore(reg.snapshot(), RetentionConfig::default()).expect("restore");
        let device = restored.device(DeviceId(3)).expect("device");
        assert_eq!(
            device.get_effective_config(lora).map(|f| f["region"].clone()),
            Some(json!("US"))
        );
        assert_eq!(device.overlay().pending_count(), 0);
        assert_eq!(device.config_progress_percent(), 0);
        assert_eq!(device.traceroute_targets(), vec![9]);
        assert!(device.get_waypoint(77).is_some());
    }

    #[test]
    fn memory_store_round_trips_snapshot() {
        let store = MemoryStore::new();
        assert!(store.load().expect("load").is_none());
        let mut reg = DeviceRegistry::default();
        identified(&mut reg, 4, 0x3333);
        save_registry(&store, &reg).expect("save");
        let (loaded, report) = load_registry(&store, RetentionConfig::default()).expect("load");
        assert_eq!(report.devices, 1);
        assert!(loaded.has_device(DeviceId(4)));
    }

    #[test]
    fn unknown_schema_is_rejected() {
        let state = PersistedState {
            schema_version: 99,
            ..Default::default()
        };
        assert!(matches!(
            DeviceRegistry::restore(state, RetentionConfig::default()),
            Err(StateError::SchemaMismatch { found: 99, .. })
        ));
    }
}
