//! # Device Session Record
//!
//! Everything the panel knows about one connected (or previously connected)
//! radio session except its node database, which the registry keeps in a
//! separate capped map keyed by the same [`DeviceId`].
//!
//! Outgoing traffic goes through the attached [`Transport`]. Sends are
//! fire-and-forget: local state is updated first and a transport failure is
//! logged and counted, never rolled back.

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};

use crate::errors::{Result, StateError};
use crate::logutil::{escape_log, node_label};
use crate::metrics;
use crate::overlay::ConfigOverlay;
use crate::protocol::{
    AdminMessage, ChangeKey, Channel, ClientNotification, ConfigVariant, DeviceMetadata, Fields,
    MyNodeInfo, NeighborInfo, PortNum, RouteDiscovery, Transport, Waypoint,
};
use crate::retention::{CappedLog, CappedMap, RetentionConfig};
use crate::types::{ConversationKey, Destination, DeviceId, DeviceStatus, NodeNum};

/// One traceroute result for a target.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TracerouteEntry {
    pub from: NodeNum,
    pub rx_time: DateTime<Utc>,
    pub route: RouteDiscovery,
}

/// A waypoint plus bookkeeping about where and when it was received.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoredWaypoint {
    pub waypoint: Waypoint,
    pub from: NodeNum,
    pub channel: u32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// A pending local edit that diverged from what the radio later confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigConflict {
    pub key: ChangeKey,
    pub local: Fields,
    pub remote: Fields,
}

/// Destination for admin traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAdminTarget {
    pub node: Option<NodeNum>,
    pub authorized: bool,
}

impl Default for RemoteAdminTarget {
    fn default() -> Self {
        Self {
            node: None,
            authorized: true,
        }
    }
}

/// What happened to an admin message handed to [`DeviceRecord::send_admin_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminSendOutcome {
    Sent { packet_id: u32 },
    /// Held until the remote target authorizes this client.
    Queued,
}

pub struct DeviceRecord {
    id: DeviceId,
    pub status: DeviceStatus,
    hardware: MyNodeInfo,
    overlay: ConfigOverlay,
    metadata: BTreeMap<NodeNum, DeviceMetadata>,
    traceroutes: CappedMap<NodeNum, CappedLog<TracerouteEntry>>,
    waypoints: CappedLog<StoredWaypoint>,
    neighbor_info: HashMap<NodeNum, NeighborInfo>,
    client_notifications: Vec<ClientNotification>,
    config_conflicts: BTreeMap<ChangeKey, ConfigConflict>,
    remote_admin: RemoteAdminTarget,
    recently_connected: Vec<NodeNum>,
    queued_admin: Vec<AdminMessage>,
    session_passkey: Vec<u8>,
    dialogs: BTreeMap<String, bool>,
    unread: HashMap<ConversationKey, u32>,
    drafts: HashMap<ConversationKey, String>,
    transport: Option<Box<dyn Transport>>,
    retention: RetentionConfig,
}

impl std::fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("my_node_num", &self.hardware.my_node_num)
            .field("traceroute_targets", &self.traceroutes.len())
            .field("waypoints", &self.waypoints.len())
            .field("connected", &self.transport.is_some())
            .finish()
    }
}

impl DeviceRecord {
    pub fn new(id: DeviceId, retention: RetentionConfig) -> Self {
        Self {
            id,
            status: DeviceStatus::Disconnected,
            hardware: MyNodeInfo::default(),
            overlay: ConfigOverlay::new(),
            metadata: BTreeMap::new(),
            traceroutes: CappedMap::new(retention.max_traceroute_targets),
            waypoints: CappedLog::new(retention.max_waypoints),
            neighbor_info: HashMap::new(),
            client_notifications: Vec::new(),
            config_conflicts: BTreeMap::new(),
            remote_admin: RemoteAdminTarget::default(),
            recently_connected: Vec::new(),
            queued_admin: Vec::new(),
            session_passkey: Vec::new(),
            dialogs: BTreeMap::new(),
            unread: HashMap::new(),
            drafts: HashMap::new(),
            transport: None,
            retention,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn hardware(&self) -> &MyNodeInfo {
        &self.hardware
    }

    pub fn my_node_num(&self) -> Option<NodeNum> {
        (self.hardware.my_node_num != 0).then_some(self.hardware.my_node_num)
    }

    /// Store hardware info. Identity resolution is the registry's job.
    pub(crate) fn set_hardware_info(&mut self, info: MyNodeInfo) {
        self.hardware = info;
    }

    pub fn set_status(&mut self, status: DeviceStatus) {
        if self.status != status {
            debug!("Device {} status {:?} -> {:?}", self.id, self.status, status);
        }
        self.status = status;
    }

    // ---------- transport ----------

    pub fn attach_transport(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
    }

    pub fn detach_transport(&mut self) -> Option<Box<dyn Transport>> {
        self.transport.take()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    fn transport(&self) -> Result<&dyn Transport> {
        self.transport
            .as_deref()
            .ok_or(StateError::NotConnected(self.id))
    }

    // ---------- configuration ----------

    pub fn overlay(&self) -> &ConfigOverlay {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut ConfigOverlay {
        &mut self.overlay
    }

    /// Store a confirmed config value from the radio.
    ///
    /// If a pending edit touches a field whose confirmed value changed underneath it,
    /// the divergence is recorded as a config conflict.
    pub fn set_config(&mut self, variant: ConfigVariant, value: Fields) {
        let key = ChangeKey::from(variant);
        if let Some(local) = self.overlay.change(key) {
            let previous = self.overlay.baseline(variant);
            let diverged = local.keys().any(|field| {
                let before = previous.and_then(|p| p.get(field));
                let after = value.get(field);
                before.is_some() && before != after && after != local.get(field)
            });
            if diverged {
                info!(
                    "Device {} confirmed {} while a local edit was pending",
                    self.id,
                    variant.case_name()
                );
                let conflict = ConfigConflict {
                    key,
                    local: local.clone(),
                    remote: value.clone(),
                };
                self.config_conflicts.insert(key, conflict);
            }
        }
        self.overlay.set_baseline(variant, value);
    }

    pub fn get_effective_config(&self, variant: ConfigVariant) -> Option<Fields> {
        self.overlay.get_effective(variant)
    }

    pub fn add_channel(&mut self, channel: Channel) -> Result<()> {
        self.overlay.set_channel(channel)
    }

    pub fn config_progress_percent(&self) -> u8 {
        self.overlay.progress().percent()
    }

    pub fn set_config_conflict(&mut self, key: ChangeKey, local: Fields, remote: Fields) {
        self.config_conflicts
            .insert(key, ConfigConflict { key, local, remote });
    }

    pub fn config_conflict(&self, key: ChangeKey) -> Option<&ConfigConflict> {
        self.config_conflicts.get(&key)
    }

    pub fn clear_config_conflicts(&mut self) {
        self.config_conflicts.clear();
    }

    pub fn has_any_conflicts(&self) -> bool {
        !self.config_conflicts.is_empty()
    }

    // ---------- metadata / neighbors ----------

    pub fn add_metadata(&mut self, from: NodeNum, metadata: DeviceMetadata) {
        self.metadata.insert(from, metadata);
    }

    pub fn get_metadata(&self, num: NodeNum) -> Option<&DeviceMetadata> {
        self.metadata.get(&num)
    }

    pub fn metadata(&self) -> impl Iterator<Item = (&NodeNum, &DeviceMetadata)> {
        self.metadata.iter()
    }

    pub fn add_neighbor_info(&mut self, from: NodeNum, info: NeighborInfo) {
        self.neighbor_info.insert(from, info);
    }

    pub fn neighbor_info(&self, num: NodeNum) -> Option<&NeighborInfo> {
        self.neighbor_info.get(&num)
    }

    // ---------- traceroutes ----------

    pub fn add_traceroute(&mut self, from: NodeNum, route: RouteDiscovery, rx_time: DateTime<Utc>) {
        let per_target = self.retention.max_traceroutes_per_target;
        let (log, evicted_targets) = self
            .traceroutes
            .get_or_insert_with(from, || CappedLog::new(per_target));
        let evicted_entries = log.push(TracerouteEntry {
            from,
            rx_time,
            route,
        });
        let evicted = evicted_targets.len() + evicted_entries.len();
        if evicted > 0 {
            metrics::add_evictions(evicted);
            debug!(
                "Device {} traceroute retention evicted {} target(s), {} entrie(s)",
                self.id,
                evicted_targets.len(),
                evicted_entries.len()
            );
        }
    }

    pub(crate) fn restore_traceroute(&mut self, target: NodeNum, entry: TracerouteEntry) {
        let per_target = self.retention.max_traceroutes_per_target;
        let (log, _) = self
            .traceroutes
            .get_or_insert_with(target, || CappedLog::new(per_target));
        log.push(entry);
    }

    pub fn traceroutes_for(&self, target: NodeNum) -> Option<&CappedLog<TracerouteEntry>> {
        self.traceroutes.get(&target)
    }

    /// Targets in insertion order, oldest first.
    pub fn traceroute_targets(&self) -> Vec<NodeNum> {
        self.traceroutes.keys().copied().collect()
    }

    pub fn traceroutes(&self) -> impl Iterator<Item = (&NodeNum, &CappedLog<TracerouteEntry>)> {
        self.traceroutes.iter()
    }

    // ---------- waypoints ----------

    /// Upsert by waypoint id; the updated entry becomes the most recent.
    pub fn add_waypoint(
        &mut self,
        waypoint: Waypoint,
        from: NodeNum,
        channel: u32,
        rx_time: DateTime<Utc>,
    ) {
        let id = waypoint.id;
        let created = self
            .waypoints
            .find(|w| w.waypoint.id == id)
            .map(|w| w.created)
            .unwrap_or(rx_time);
        let entry = StoredWaypoint {
            waypoint,
            from,
            channel,
            created,
            updated: rx_time,
        };
        let evicted = self.waypoints.upsert_by(entry, |w| w.waypoint.id == id);
        if !evicted.is_empty() {
            metrics::add_evictions(evicted.len());
            debug!("Device {} evicted {} waypoint(s)", self.id, evicted.len());
        }
    }

    pub(crate) fn restore_waypoint(&mut self, stored: StoredWaypoint) {
        let id = stored.waypoint.id;
        self.waypoints.upsert_by(stored, |w| w.waypoint.id == id);
    }

    pub fn get_waypoint(&self, id: u32) -> Option<&StoredWaypoint> {
        self.waypoints.find(|w| w.waypoint.id == id)
    }

    pub fn waypoints(&self) -> impl Iterator<Item = &StoredWaypoint> {
        self.waypoints.iter()
    }

    /// Remove locally; when `broadcast_to_mesh` also tell the mesh to drop it.
    pub fn remove_waypoint(&mut self, id: u32, broadcast_to_mesh: bool) -> Result<()> {
        let stored = self
            .get_waypoint(id)
            .cloned()
            .ok_or(StateError::WaypointNotFound(id))?;
        self.waypoints.retain(|w| w.waypoint.id != id);

        if broadcast_to_mesh {
            // Firmware treats an already-expired waypoint as a deletion.
            let mut tombstone = stored.waypoint;
            tombstone.expire = Utc.timestamp_opt(1, 0).single();
            match self
                .transport()
                .and_then(|t| t.send_waypoint(&tombstone, Destination::Broadcast, stored.channel))
            {
                Ok(_) => debug!("Device {} broadcast removal of waypoint {}", self.id, id),
                Err(e) => warn!(
                    "Device {} failed to broadcast removal of waypoint {}: {}",
                    self.id, id, e
                ),
            }
        }
        Ok(())
    }

    // ---------- notifications / dialogs / chat bookkeeping ----------

    pub fn add_client_notification(&mut self, notification: ClientNotification) {
        info!(
            "Device {} notification [{:?}] {}",
            self.id,
            notification.level,
            escape_log(&notification.message)
        );
        self.client_notifications.push(notification);
    }

    pub fn remove_client_notification(&mut self, index: usize) -> Option<ClientNotification> {
        (index < self.client_notifications.len()).then(|| self.client_notifications.remove(index))
    }

    pub fn client_notification(&self, index: usize) -> Option<&ClientNotification> {
        self.client_notifications.get(index)
    }

    pub fn client_notifications(&self) -> &[ClientNotification] {
        &self.client_notifications
    }

    pub fn set_dialog_open(&mut self, name: &str, open: bool) {
        self.dialogs.insert(name.to_string(), open);
    }

    pub fn dialog_open(&self, name: &str) -> bool {
        self.dialogs.get(name).copied().unwrap_or(false)
    }

    pub fn increment_unread(&mut self, key: ConversationKey) -> u32 {
        let count = self.unread.entry(key).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn reset_unread(&mut self, key: ConversationKey) {
        self.unread.remove(&key);
    }

    pub fn unread_count(&self, key: ConversationKey) -> u32 {
        self.unread.get(&key).copied().unwrap_or(0)
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.values().fold(0u32, |acc, n| acc.saturating_add(*n))
    }

    pub fn set_message_draft(&mut self, key: ConversationKey, text: String) {
        if text.is_empty() {
            self.drafts.remove(&key);
        } else {
            self.drafts.insert(key, text);
        }
    }

    pub fn message_draft(&self, key: ConversationKey) -> Option<&str> {
        self.drafts.get(&key).map(String::as_str)
    }

    // ---------- admin ----------

    pub fn remote_admin_target(&self) -> RemoteAdminTarget {
        self.remote_admin
    }

    pub fn recently_connected_nodes(&self) -> &[NodeNum] {
        &self.recently_connected
    }

    pub fn queued_admin_messages(&self) -> &[AdminMessage] {
        &self.queued_admin
    }

    /// Passkey from the most recent admin response; stamped on outgoing admin messages.
    pub fn set_session_passkey(&mut self, passkey: Vec<u8>) {
        self.session_passkey = passkey;
    }

    /// Point admin traffic at a remote node (or back at the local radio with `None`).
    pub fn set_remote_admin_target(&mut self, node: Option<NodeNum>) {
        match node {
            Some(n) => {
                self.remote_admin = RemoteAdminTarget {
                    node: Some(n),
                    authorized: false,
                };
                if !self.recently_connected.contains(&n) {
                    self.recently_connected.push(n);
                }
                info!("Device {} remote admin target {}", self.id, node_label(n));
            }
            None => {
                self.remote_admin = RemoteAdminTarget::default();
                self.queued_admin.clear();
                self.session_passkey.clear();
                info!("Device {} remote admin target cleared", self.id);
            }
        }
    }

    /// Mark the remote target as authorized; flushes queued admin messages in order.
    pub fn set_remote_admin_authorized(&mut self, authorized: bool) {
        self.remote_admin.authorized = authorized;
        if !authorized || self.queued_admin.is_empty() {
            return;
        }
        let queued = std::mem::take(&mut self.queued_admin);
        info!(
            "Device {} flushing {} queued admin message(s)",
            self.id,
            queued.len()
        );
        for message in queued {
            if let Err(e) = self.dispatch_admin(&message) {
                warn!(
                    "Device {} failed to send queued {}: {}",
                    self.id,
                    message.describe(),
                    e
                );
            }
        }
    }

    /// `SelfNode` unless a remote target is set and authorized.
    pub fn admin_destination(&self) -> Destination {
        match self.remote_admin {
            RemoteAdminTarget {
                node: Some(n),
                authorized: true,
            } => Destination::Node(n),
            _ => Destination::SelfNode,
        }
    }

    /// Encode and hand an admin message to the transport, or queue it while a remote
    /// target is still unauthorized.
    pub fn send_admin_message(&mut self, message: AdminMessage) -> Result<AdminSendOutcome> {
        if self.remote_admin.node.is_some() && !self.remote_admin.authorized {
            debug!(
                "Device {} queued {} until remote admin is authorized",
                self.id,
                message.describe()
            );
            self.queued_admin.push(message);
            metrics::inc_admin_queued();
            return Ok(AdminSendOutcome::Queued);
        }
        let packet_id = self.dispatch_admin(&message)?;
        Ok(AdminSendOutcome::Sent { packet_id })
    }

    fn dispatch_admin(&self, message: &AdminMessage) -> Result<u32> {
        let destination = self.admin_destination();
        let payload = if self.session_passkey.is_empty() || !message.session_passkey.is_empty() {
            message.to_bytes()
        } else {
            let mut stamped = message.clone();
            stamped.session_passkey = self.session_passkey.clone();
            stamped.to_bytes()
        };
        let result = self
            .transport()
            .and_then(|t| t.send_packet(payload, PortNum::AdminApp, destination, 0));
        match &result {
            Ok(id) => {
                metrics::inc_admin_sent();
                debug!(
                    "Device {} sent {} to {} (packet {:#010x})",
                    self.id,
                    message.describe(),
                    destination,
                    id
                );
            }
            Err(_) => metrics::inc_admin_send_failed(),
        }
        result
    }

    // ---------- reconnect transfer ----------

    /// Take over history from an older session of the same radio.
    ///
    /// Traceroutes move verbatim ahead of this session's own entries. Waypoints that
    /// expired before `now` are dropped; this session's copy wins on id collisions.
    pub(crate) fn absorb_history(&mut self, old: DeviceRecord, now: DateTime<Utc>) {
        let mut combined: CappedMap<NodeNum, CappedLog<TracerouteEntry>> =
            CappedMap::new(self.retention.max_traceroute_targets);
        let per_target = self.retention.max_traceroutes_per_target;
        let mine = std::mem::replace(&mut self.traceroutes, CappedMap::new(0));
        for (target, log) in old.traceroutes.iter().chain(mine.iter()) {
            let (dest, _) = combined.get_or_insert_with(*target, || CappedLog::new(per_target));
            for entry in log.iter() {
                dest.push(entry.clone());
            }
        }
        combined.enforce_cap();
        self.traceroutes = combined;

        let mut dropped = 0usize;
        let mine = std::mem::replace(&mut self.waypoints, CappedLog::new(self.retention.max_waypoints));
        for stored in old.waypoints.into_vec() {
            if stored.waypoint.is_expired_at(now) {
                dropped += 1;
                continue;
            }
            self.waypoints.push(stored);
        }
        for stored in mine.into_vec() {
            let id = stored.waypoint.id;
            self.waypoints.upsert_by(stored, |w| w.waypoint.id == id);
        }
        debug!(
            "Device {} absorbed history from session {} ({} expired waypoint(s) dropped)",
            self.id, old.id, dropped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RadioVariant;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Recorder {
        sent: Arc<Mutex<Vec<(PortNum, Destination, Vec<u8>)>>>,
        waypoints: Arc<Mutex<Vec<(Waypoint, Destination)>>>,
    }

    impl Transport for Recorder {
        fn send_packet(
            &self,
            payload: Vec<u8>,
            port: PortNum,
            destination: Destination,
            _channel: u32,
        ) -> Result<u32> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((port, destination, payload));
            Ok(sent.len() as u32)
        }

        fn send_waypoint(
            &self,
            waypoint: &Waypoint,
            destination: Destination,
            _channel: u32,
        ) -> Result<u32> {
            self.waypoints
                .lock()
                .unwrap()
                .push((waypoint.clone(), destination));
            Ok(1)
        }
    }

    fn device_with_recorder() -> (DeviceRecord, Recorder) {
        let mut device = DeviceRecord::new(DeviceId(1), RetentionConfig::default());
        let rec = Recorder::default();
        device.attach_transport(Box::new(rec.clone()));
        (device, rec)
    }

    fn fields(v: serde_json::Value) -> Fields {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn admin_goes_to_self_by_default() {
        let (mut device, rec) = device_with_recorder();
        let outcome = device
            .send_admin_message(AdminMessage::favorite(5, true))
            .expect("send");
        assert!(matches!(outcome, AdminSendOutcome::Sent { .. }));
        let sent = rec.sent.lock().unwrap();
        assert_eq!(sent[0].0, PortNum::AdminApp);
        assert_eq!(sent[0].1, Destination::SelfNode);
    }

    #[test]
    fn remote_target_queues_until_authorized() {
        let (mut device, rec) = device_with_recorder();
        device.set_remote_admin_target(Some(0xABCD));
        assert_eq!(device.admin_destination(), Destination::SelfNode);
        assert_eq!(device.recently_connected_nodes(), &[0xABCD]);

        let outcome = device
            .send_admin_message(AdminMessage::ignored(9, true))
            .expect("queue");
        assert_eq!(outcome, AdminSendOutcome::Queued);
        assert!(rec.sent.lock().unwrap().is_empty());

        device.set_remote_admin_authorized(true);
        assert!(device.queued_admin_messages().is_empty());
        let sent = rec.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, Destination::Node(0xABCD));
        drop(sent);

        device.set_remote_admin_target(None);
        assert_eq!(device.admin_destination(), Destination::SelfNode);
        assert!(device.remote_admin_target().authorized);
    }

    #[test]
    fn send_without_transport_errors() {
        let mut device = DeviceRecord::new(DeviceId(2), RetentionConfig::default());
        assert!(matches!(
            device.send_admin_message(AdminMessage::remove_node(3)),
            Err(StateError::NotConnected(DeviceId(2)))
        ));
    }

    #[test]
    fn waypoint_upsert_keeps_created_and_moves_to_back() {
        let mut device = DeviceRecord::new(
            DeviceId(3),
            RetentionConfig {
                max_waypoints: 2,
                ..Default::default()
            },
        );
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(10);
        let wp = |id| Waypoint {
            id,
            ..Default::default()
        };
        device.add_waypoint(wp(1), 10, 0, t0);
        device.add_waypoint(wp(2), 10, 0, t0);
        device.add_waypoint(wp(1), 10, 0, t1);
        device.add_waypoint(wp(3), 10, 0, t1);

        let ids: Vec<u32> = device.waypoints().map(|w| w.waypoint.id).collect();
        assert_eq!(ids, vec![1, 3]);
        let first = device.get_waypoint(1).expect("wp 1");
        assert_eq!(first.created, t0);
        assert_eq!(first.updated, t1);
    }

    #[test]
    fn remove_waypoint_broadcasts_only_when_asked() {
        let (mut device, rec) = device_with_recorder();
        let now = Utc::now();
        for id in [1, 2] {
            device.add_waypoint(
                Waypoint {
                    id,
                    ..Default::default()
                },
                10,
                0,
                now,
            );
        }
        device.remove_waypoint(1, false).expect("remove");
        assert!(rec.waypoints.lock().unwrap().is_empty());
        device.remove_waypoint(2, true).expect("remove");
        let sent = rec.waypoints.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, Destination::Broadcast);
        assert!(sent[0].0.is_expired_at(now));
        assert!(device.get_waypoint(2).is_none());
        assert!(matches!(
            device.remove_waypoint(2, false),
            Err(StateError::WaypointNotFound(2))
        ));
    }

    #[test]
    fn confirmed_value_under_pending_edit_records_conflict() {
        let mut device = DeviceRecord::new(DeviceId(4), RetentionConfig::default());
        let lora = ConfigVariant::Radio(RadioVariant::Lora);
        device.set_config(lora, fields(json!({"hopLimit": 3})));
        device
            .overlay_mut()
            .set_change(lora.into(), fields(json!({"hopLimit": 5})))
            .expect("stage");
        assert!(!device.has_any_conflicts());

        device.set_config(lora, fields(json!({"hopLimit": 4})));
        let conflict = device.config_conflict(lora.into()).expect("conflict");
        assert_eq!(conflict.local["hopLimit"], json!(5));
        assert_eq!(conflict.remote["hopLimit"], json!(4));

        device.clear_config_conflicts();
        assert!(!device.has_any_conflicts());
    }

    #[test]
    fn notifications_remove_by_index() {
        let mut device = DeviceRecord::new(DeviceId(5), RetentionConfig::default());
        for msg in ["a", "b"] {
            device.add_client_notification(ClientNotification {
                level: Default::default(),
                message: msg.into(),
                time: Utc::now(),
                reply_id: None,
            });
        }
        assert_eq!(
            device.remove_client_notification(0).map(|n| n.message),
            Some("a".to_string())
        );
        assert_eq!(device.client_notification(0).map(|n| n.message.as_str()), Some("b"));
        assert!(device.remove_client_notification(5).is_none());
    }

    #[test]
    fn unread_and_drafts() {
        let mut device = DeviceRecord::new(DeviceId(6), RetentionConfig::default());
        let dm = ConversationKey::Direct(7);
        device.increment_unread(dm);
        device.increment_unread(dm);
        device.increment_unread(ConversationKey::Channel(0));
        assert_eq!(device.unread_count(dm), 2);
        assert_eq!(device.total_unread(), 3);
        device.reset_unread(dm);
        assert_eq!(device.total_unread(), 1);

        device.set_message_draft(dm, "hello".into());
        assert_eq!(device.message_draft(dm), Some("hello"));
        device.set_message_draft(dm, String::new());
        assert_eq!(device.message_draft(dm), None);
    }

    #[test]
    fn total_unread_saturates() {
        let mut device = DeviceRecord::new(DeviceId(7), RetentionConfig::default());
        device.unread.insert(ConversationKey::Direct(1), u32::MAX);
        device.increment_unread(ConversationKey::Channel(2));
        assert_eq!(device.total_unread(), u32::MAX);
    }
}
