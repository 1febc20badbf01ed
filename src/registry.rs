//! # Device Registry
//!
//! The aggregate root. Owns every [`DeviceRecord`] and every [`NodeDatabase`],
//! both held in capped maps keyed by [`DeviceId`], and is the only place that
//! mutates them.
//!
//! ## Identity resolution
//!
//! Session ids are per connection. When a session learns its radio's
//! `my_node_num` ([`DeviceRegistry::set_hardware`]) any other session that
//! already claims the same number is folded into the new one:
//!
//! 1. the older node database is merged into the new one (old wins on key conflicts),
//! 2. traceroutes and non-expired waypoints move onto the new record,
//! 3. the older device record and database are deleted,
//! 4. both caps are re-checked.
//!
//! ## Addressing
//!
//! Callers either pass an explicit [`DeviceId`] or use the "current device"
//! accessors; both resolve to the same records.

use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};

use crate::device::DeviceRecord;
use crate::errors::{Result, StateError};
use crate::logutil::node_label;
use crate::metrics;
use crate::node_db::{NodeDatabase, NodeRecord};
use crate::protocol::{
    AdminMessage, ConfigVariant, Fields, InboundEvent, ModuleVariant, MyNodeInfo, RadioVariant,
};
use crate::retention::{CappedMap, RetentionConfig};
use crate::types::{DeviceId, NodeNum};

pub struct DeviceRegistry {
    pub(crate) devices: CappedMap<DeviceId, DeviceRecord>,
    pub(crate) node_dbs: CappedMap<DeviceId, NodeDatabase>,
    pub(crate) current: Option<DeviceId>,
    pub(crate) retention: RetentionConfig,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.devices.len())
            .field("node_databases", &self.node_dbs.len())
            .field("current", &self.current)
            .finish()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(RetentionConfig::default())
    }
}

impl DeviceRegistry {
    pub fn new(retention: RetentionConfig) -> Self {
        Self {
            devices: CappedMap::new(retention.max_devices),
            node_dbs: CappedMap::new(retention.max_node_databases),
            current: None,
            retention,
        }
    }

    pub fn retention(&self) -> &RetentionConfig {
        &self.retention
    }

    // ---------- device lifecycle ----------

    /// Return the record for `id`, creating it if needed. Calling this twice
    /// with the same id yields the same record and leaves the count unchanged.
    pub fn add_device(&mut self, id: DeviceId) -> &mut DeviceRecord {
        let retention = self.retention;
        let fresh = !self.devices.contains_key(&id);
        let (_, evicted) = self
            .devices
            .get_or_insert_with(id, || DeviceRecord::new(id, retention));
        let evicted: Vec<DeviceId> = evicted.into_iter().map(|(k, _)| k).collect();
        if fresh {
            info!("Device {} added", id);
        }
        self.drop_evicted_devices(evicted);
        self.devices
            .get_or_insert_with(id, || DeviceRecord::new(id, retention))
            .0
    }

    /// Remove a device session and the node database keyed by it.
    pub fn remove_device(&mut self, id: DeviceId) -> Result<DeviceRecord> {
        let device = self
            .devices
            .remove(&id)
            .ok_or(StateError::DeviceNotFound(id))?;
        self.node_dbs.remove(&id);
        if self.current == Some(id) {
            self.current = None;
        }
        info!("Device {} removed", id);
        Ok(device)
    }

    fn drop_evicted_devices(&mut self, evicted: Vec<DeviceId>) {
        if evicted.is_empty() {
            return;
        }
        metrics::add_evictions(evicted.len());
        for id in evicted {
            info!("Device {} evicted (retention cap {})", id, self.devices.cap());
            self.node_dbs.remove(&id);
            if self.current == Some(id) {
                self.current = None;
            }
        }
    }

    pub fn device(&self, id: DeviceId) -> Result<&DeviceRecord> {
        self.devices.get(&id).ok_or(StateError::DeviceNotFound(id))
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Result<&mut DeviceRecord> {
        self.devices
            .get_mut(&id)
            .ok_or(StateError::DeviceNotFound(id))
    }

    pub fn has_device(&self, id: DeviceId) -> bool {
        self.devices.contains_key(&id)
    }

    /// Device ids, oldest first.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.iter().map(|(_, d)| d)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    // ---------- current device ----------

    pub fn set_current_device(&mut self, id: Option<DeviceId>) -> Result<()> {
        if let Some(id) = id {
            if !self.devices.contains_key(&id) {
                return Err(StateError::DeviceNotFound(id));
            }
        }
        self.current = id;
        Ok(())
    }

    pub fn current_id(&self) -> Option<DeviceId> {
        self.current
    }

    pub fn current(&self) -> Option<&DeviceRecord> {
        self.current.and_then(|id| self.devices.get(&id))
    }

    pub fn current_mut(&mut self) -> Option<&mut DeviceRecord> {
        let id = self.current?;
        self.devices.get_mut(&id)
    }

    pub fn current_node_db(&self) -> Option<&NodeDatabase> {
        self.current.and_then(|id| self.node_dbs.get(&id))
    }

    // ---------- node databases ----------

    pub fn node_db(&self, id: DeviceId) -> Result<&NodeDatabase> {
        self.node_dbs
            .get(&id)
            .ok_or(StateError::NodeDatabaseNotFound(id))
    }

    pub fn node_db_mut(&mut self, id: DeviceId) -> Result<&mut NodeDatabase> {
        self.node_dbs
            .get_mut(&id)
            .ok_or(StateError::NodeDatabaseNotFound(id))
    }

    pub fn node_db_count(&self) -> usize {
        self.node_dbs.len()
    }

    /// Create the node database for `id` if missing. The device must exist.
    pub fn add_node_database(&mut self, id: DeviceId) -> Result<&mut NodeDatabase> {
        let my_node_num = self.device(id)?.my_node_num();
        let db = self.node_dbs.get_or_insert_deferred(id, NodeDatabase::new);
        if db.my_node_num().is_none() {
            if let Some(num) = my_node_num {
                db.set_my_node_num(num);
            }
        }
        self.enforce_node_db_cap();
        self.node_db_mut(id)
    }

    fn enforce_node_db_cap(&mut self) {
        let evicted = self.node_dbs.enforce_cap();
        if evicted.is_empty() {
            return;
        }
        metrics::add_evictions(evicted.len());
        for (old, _) in &evicted {
            info!(
                "Node database for device {} evicted (retention cap {})",
                old,
                self.node_dbs.cap()
            );
        }
    }

    /// Record the radio's hardware info and resolve its identity against other sessions.
    pub fn set_hardware(&mut self, id: DeviceId, info: MyNodeInfo, now: DateTime<Utc>) -> Result<()> {
        let num = info.my_node_num;
        self.device_mut(id)?.set_hardware_info(info);
        if num == 0 {
            return Ok(());
        }

        let mut previous: Vec<DeviceId> = Vec::new();
        for other in self.devices.keys().chain(self.node_dbs.keys()) {
            if *other == id || previous.contains(other) {
                continue;
            }
            let claims = self
                .devices
                .get(other)
                .is_some_and(|d| d.my_node_num() == Some(num))
                || self
                    .node_dbs
                    .get(other)
                    .is_some_and(|db| db.my_node_num() == Some(num));
            if claims {
                previous.push(*other);
            }
        }

        // Cap is enforced after the merge so earlier sessions of this radio merge
        // instead of being evicted.
        self.node_dbs
            .get_or_insert_deferred(id, NodeDatabase::new)
            .set_my_node_num(num);
        for old_id in previous {
            self.absorb_session(id, old_id, now)?;
        }

        self.enforce_node_db_cap();
        let evicted_devices: Vec<DeviceId> =
            self.devices.enforce_cap().into_iter().map(|(k, _)| k).collect();
        self.drop_evicted_devices(evicted_devices);
        Ok(())
    }

    fn absorb_session(&mut self, id: DeviceId, old_id: DeviceId, now: DateTime<Utc>) -> Result<()> {
        if let Some(old_db) = self.node_dbs.remove(&old_id) {
            let report = self.node_db_mut(id)?.merge_from(old_db);
            metrics::inc_node_db_merges();
            metrics::add_identity_conflicts(report.key_conflicts);
            info!(
                "Device {} took over node database of session {}: {} copied, {} kept old, {} kept new, {} key conflict(s)",
                id, old_id, report.copied_from_old, report.kept_old, report.kept_new, report.key_conflicts
            );
        }
        if let Some(old_device) = self.devices.remove(&old_id) {
            self.device_mut(id)?.absorb_history(old_device, now);
        }
        if self.current == Some(old_id) {
            self.current = Some(id);
        }
        Ok(())
    }

    // ---------- inbound events ----------

    /// Apply one decoded transport event to the device `id`.
    pub fn apply(&mut self, id: DeviceId, event: InboundEvent, now: DateTime<Utc>) -> Result<()> {
        if !self.devices.contains_key(&id) {
            return Err(StateError::DeviceNotFound(id));
        }
        match event {
            InboundEvent::Status(status) => self.device_mut(id)?.set_status(status),
            InboundEvent::HardwareInfo(info) => self.set_hardware(id, info, now)?,
            InboundEvent::PacketSeen(meta) => self.add_node_database(id)?.process_packet(&meta),
            InboundEvent::NodeInfo(record) => self.add_node_database(id)?.add_node(record),
            InboundEvent::UserInfo { from, user } => self.add_node_database(id)?.add_user(from, user),
            InboundEvent::Position { from, position } => {
                self.add_node_database(id)?.add_position(from, position)
            }
            InboundEvent::Telemetry { from, metrics } => {
                self.add_node_database(id)?.add_device_metrics(from, metrics)
            }
            InboundEvent::Config { variant, value } => match RadioVariant::from_case_name(&variant) {
                Some(v) => self.device_mut(id)?.set_config(ConfigVariant::Radio(v), value),
                None => debug!("Device {} ignoring unknown config variant {:?}", id, variant),
            },
            InboundEvent::ModuleConfig { variant, value } => {
                match ModuleVariant::from_case_name(&variant) {
                    Some(v) => self.device_mut(id)?.set_config(ConfigVariant::Module(v), value),
                    None => debug!("Device {} ignoring unknown module config {:?}", id, variant),
                }
            }
            InboundEvent::Channel(channel) => self.device_mut(id)?.add_channel(channel)?,
            InboundEvent::Metadata { from, metadata } => {
                self.device_mut(id)?.add_metadata(from, metadata)
            }
            InboundEvent::RouteDiscovered { from, route } => {
                self.device_mut(id)?.add_traceroute(from, route, now)
            }
            InboundEvent::Waypoint {
                from,
                channel,
                waypoint,
                rx_time,
            } => self
                .device_mut(id)?
                .add_waypoint(waypoint, from, channel, rx_time),
            InboundEvent::NeighborInfo { from, info } => {
                self.device_mut(id)?.add_neighbor_info(from, info)
            }
            InboundEvent::ClientNotification(notification) => {
                self.device_mut(id)?.add_client_notification(notification)
            }
        }
        trace!("Device {} event applied", id);
        Ok(())
    }

    // ---------- node operations ----------

    pub fn get_node(&self, id: DeviceId, num: NodeNum) -> Result<Option<&NodeRecord>> {
        Ok(self.node_db(id)?.get_node(num))
    }

    /// Every node except the radio itself, optionally filtered.
    pub fn get_nodes(
        &self,
        id: DeviceId,
        predicate: Option<&dyn Fn(&NodeRecord) -> bool>,
    ) -> Result<Vec<&NodeRecord>> {
        Ok(self.node_db(id)?.get_nodes(predicate))
    }

    /// Set the favourite flag locally and tell the radio.
    pub fn update_favorite(&mut self, id: DeviceId, num: NodeNum, is_favorite: bool) -> Result<()> {
        self.update_node_flag(id, num, AdminMessage::favorite(num, is_favorite), |n| {
            n.is_favorite = is_favorite
        })
    }

    /// Set the ignored flag locally and tell the radio.
    pub fn update_ignored(&mut self, id: DeviceId, num: NodeNum, is_ignored: bool) -> Result<()> {
        self.update_node_flag(id, num, AdminMessage::ignored(num, is_ignored), |n| {
            n.is_ignored = is_ignored
        })
    }

    fn update_node_flag(
        &mut self,
        id: DeviceId,
        num: NodeNum,
        message: AdminMessage,
        apply: impl FnOnce(&mut NodeRecord),
    ) -> Result<()> {
        self.device(id)?;
        let node = self
            .node_db_mut(id)?
            .get_node_mut(num)
            .ok_or(StateError::NodeNotFound(num))?;
        apply(node);
        self.send_admin_best_effort(id, message)
    }

    /// Drop a node locally and ask the radio to forget it too.
    pub fn forget_node(&mut self, id: DeviceId, num: NodeNum) -> Result<NodeRecord> {
        self.device(id)?;
        let removed = self
            .node_db_mut(id)?
            .remove_node(num)
            .ok_or(StateError::NodeNotFound(num))?;
        self.send_admin_best_effort(id, AdminMessage::remove_node(num))?;
        Ok(removed)
    }

    /// Local state already changed; a failed send is only logged.
    fn send_admin_best_effort(&mut self, id: DeviceId, message: AdminMessage) -> Result<()> {
        let description = message.describe();
        if let Err(e) = self.device_mut(id)?.send_admin_message(message) {
            warn!("Device {} could not send {}: {}", id, description, e);
        }
        Ok(())
    }

    // ---------- config ----------

    pub fn get_effective_config(&self, id: DeviceId, variant: ConfigVariant) -> Result<Option<Fields>> {
        Ok(self.device(id)?.get_effective_config(variant))
    }

    pub fn config_progress_percent(&self, id: DeviceId) -> Result<u8> {
        Ok(self.device(id)?.config_progress_percent())
    }

    pub fn reset_config_progress(&mut self, id: DeviceId) -> Result<()> {
        self.device_mut(id)?.overlay_mut().reset_progress();
        Ok(())
    }

    /// Summary line used by the CLI and debug logs.
    pub fn describe_device(&self, id: DeviceId) -> Result<String> {
        let device = self.device(id)?;
        let label = device
            .my_node_num()
            .map(node_label)
            .unwrap_or_else(|| "unidentified".to_string());
        let nodes = self.node_dbs.get(&id).map(|db| db.node_count()).unwrap_or(0);
        Ok(format!(
            "{} {} {:?} nodes={} sync={}%",
            id,
            label,
            device.status,
            nodes,
            device.config_progress_percent()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_db::NodeErrorKind;
    use crate::protocol::{PacketMeta, RouteDiscovery, User};

    fn hw(num: NodeNum) -> MyNodeInfo {
        MyNodeInfo {
            my_node_num: num,
            ..Default::default()
        }
    }

    fn keyed_user(key: &[u8]) -> User {
        User {
            public_key: key.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn add_device_is_idempotent() {
        let mut reg = DeviceRegistry::default();
        reg.add_device(DeviceId(1)).set_status(crate::types::DeviceStatus::Connected);
        let again = reg.add_device(DeviceId(1));
        assert_eq!(again.status, crate::types::DeviceStatus::Connected);
        assert_eq!(reg.device_count(), 1);
    }

    #[test]
    fn device_cap_evicts_oldest_and_its_database() {
        let mut reg = DeviceRegistry::new(RetentionConfig {
            max_devices: 2,
            ..Default::default()
        });
        for id in 1..=3 {
            reg.add_device(DeviceId(id));
            reg.add_node_database(DeviceId(id)).expect("db");
        }
        assert_eq!(reg.device_ids(), vec![DeviceId(2), DeviceId(3)]);
        assert!(matches!(
            reg.node_db(DeviceId(1)),
            Err(StateError::NodeDatabaseNotFound(DeviceId(1)))
        ));
    }

    #[test]
    fn removed_device_errors_on_access() {
        let mut reg = DeviceRegistry::default();
        reg.add_device(DeviceId(4));
        reg.add_node_database(DeviceId(4)).expect("db");
        reg.remove_device(DeviceId(4)).expect("remove");
        assert!(matches!(reg.device(DeviceId(4)), Err(StateError::DeviceNotFound(_))));
        assert!(matches!(
            reg.node_db(DeviceId(4)),
            Err(StateError::NodeDatabaseNotFound(_))
        ));
    }

    #[test]
    fn reconnect_merges_and_deletes_old_session() {
        let mut reg = DeviceRegistry::default();
        let now = Utc::now();
        let (old, new) = (DeviceId(10), DeviceId(11));

        reg.add_device(old);
        reg.set_hardware(old, hw(777), now).expect("hw");
        reg.node_db_mut(old).expect("db").add_user(7, keyed_user(b"A"));
        reg.node_db_mut(old).expect("db").add_user(9, keyed_user(b"Z"));
        reg.device_mut(old)
            .expect("dev")
            .add_traceroute(42, RouteDiscovery::default(), now);
        reg.set_current_device(Some(old)).expect("current");

        reg.add_device(new);
        reg.node_db_mut(new)
            .map(|_| ())
            .expect_err("no db before hardware");
        reg.apply(
            new,
            InboundEvent::UserInfo {
                from: 7,
                user: keyed_user(b"B"),
            },
            now,
        )
        .expect("user");
        reg.set_hardware(new, hw(777), now).expect("hw");

        assert!(!reg.has_device(old));
        assert!(reg.node_db(old).is_err());
        assert_eq!(reg.current_id(), Some(new));

        let db = reg.node_db(new).expect("db");
        assert_eq!(db.my_node_num(), Some(777));
        assert_eq!(db.get_node(7).map(|n| n.public_key()), Some(&b"A"[..]));
        assert!(db.get_node(9).is_some());
        assert_eq!(
            db.node_error(7).map(|e| &e.error),
            Some(&NodeErrorKind::PublicKeyMismatch)
        );
        assert_eq!(
            reg.device(new).expect("dev").traceroute_targets(),
            vec![42]
        );
    }

    #[test]
    fn packet_event_creates_database_on_demand() {
        let mut reg = DeviceRegistry::default();
        let id = DeviceId(5);
        reg.add_device(id);
        reg.apply(
            id,
            InboundEvent::PacketSeen(PacketMeta {
                from: 3,
                time: 100,
                snr: 4.5,
                ..Default::default()
            }),
            Utc::now(),
        )
        .expect("packet");
        let node = reg.get_node(id, 3).expect("db").expect("node");
        assert_eq!(node.last_heard, 100);
        assert_eq!(node.snr, 4.5);
    }

    #[test]
    fn unknown_config_variant_is_ignored() {
        let mut reg = DeviceRegistry::default();
        let id = DeviceId(6);
        reg.add_device(id);
        reg.apply(
            id,
            InboundEvent::Config {
                variant: "bogus".into(),
                value: Fields::new(),
            },
            Utc::now(),
        )
        .expect("ignored");
        assert_eq!(reg.config_progress_percent(id).expect("pct"), 0);
    }

    #[test]
    fn favorite_is_optimistic_without_transport() {
        let mut reg = DeviceRegistry::default();
        let id = DeviceId(7);
        reg.add_device(id);
        reg.add_node_database(id).expect("db").add_node(NodeRecord::new(12));
        reg.update_favorite(id, 12, true).expect("local update");
        assert!(reg.get_node(id, 12).expect("db").expect("node").is_favorite);
        assert!(matches!(
            reg.update_ignored(id, 99, true),
            Err(StateError::NodeNotFound(99))
        ));
    }

    #[test]
    fn current_device_addresses_same_record() {
        let mut reg = DeviceRegistry::default();
        let id = DeviceId(8);
        reg.add_device(id);
        assert!(reg.set_current_device(Some(DeviceId(99))).is_err());
        reg.set_current_device(Some(id)).expect("current");
        reg.current_mut()
            .expect("current")
            .set_dialog_open("import", true);
        assert!(reg.device(id).expect("dev").dialog_open("import"));
    }
}
