//! # Node Database
//!
//! Per-device view of the mesh: one [`NodeRecord`] per node number plus a side
//! table of [`NodeError`] flags. The entry whose number equals `my_node_num` is
//! the attached radio itself and is left out of [`NodeDatabase::get_nodes`].
//!
//! ## Reconnect merge
//!
//! A radio that reconnects under a new session id starts a fresh database. As
//! soon as its `my_node_num` is known the registry folds the previous database
//! into the new one with [`NodeDatabase::merge_from`]:
//!
//! | old key  | new key  | result                                   |
//! |----------|----------|------------------------------------------|
//! | `A`      | `B != A` | old record, `PublicKeyMismatch` flagged  |
//! | `A`      | empty    | old record                               |
//! | empty    | any      | new record                               |
//! | `A`      | `A`      | new record                               |
//!
//! Error tables are unioned and the old side wins on collisions.

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::logutil::{describe_node, node_label};
use crate::protocol::{DeviceMetrics, PacketMeta, Position, User};
use crate::types::NodeNum;

/// One mesh participant as seen by a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub num: NodeNum,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub device_metrics: Option<DeviceMetrics>,
    /// Unix seconds of the most recent packet from this node.
    #[serde(default)]
    pub last_heard: u32,
    #[serde(default)]
    pub snr: f32,
    #[serde(default)]
    pub channel: u32,
    #[serde(default)]
    pub via_mqtt: bool,
    #[serde(default)]
    pub hops_away: Option<u32>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_ignored: bool,
    #[serde(default)]
    pub is_key_manually_verified: bool,
}

impl NodeRecord {
    pub fn new(num: NodeNum) -> Self {
        Self {
            num,
            ..Default::default()
        }
    }

    /// Announced public key, empty when none was announced.
    pub fn public_key(&self) -> &[u8] {
        self.user
            .as_ref()
            .map(|u| u.public_key.as_slice())
            .unwrap_or(&[])
    }

    pub fn long_name(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.long_name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeErrorKind {
    /// Two different non-empty public keys were claimed for the same node number.
    PublicKeyMismatch,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    pub node: NodeNum,
    pub error: NodeErrorKind,
}

/// Counts from one [`NodeDatabase::merge_from`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// Nodes present only in the old database and copied over.
    pub copied_from_old: usize,
    /// Nodes present in both where the old record was kept.
    pub kept_old: usize,
    /// Nodes present in both where the new record was kept.
    pub kept_new: usize,
    /// Newly flagged public key mismatches.
    pub key_conflicts: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeDatabase {
    my_node_num: Option<NodeNum>,
    nodes: BTreeMap<NodeNum, NodeRecord>,
    node_errors: BTreeMap<NodeNum, NodeError>,
}

impl NodeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted parts.
    pub fn from_parts(
        my_node_num: Option<NodeNum>,
        nodes: impl IntoIterator<Item = NodeRecord>,
        node_errors: impl IntoIterator<Item = NodeError>,
    ) -> Self {
        Self {
            my_node_num,
            nodes: nodes.into_iter().map(|n| (n.num, n)).collect(),
            node_errors: node_errors.into_iter().map(|e| (e.node, e)).collect(),
        }
    }

    pub fn my_node_num(&self) -> Option<NodeNum> {
        self.my_node_num
    }

    pub fn set_my_node_num(&mut self, num: NodeNum) {
        self.my_node_num = (num != 0).then_some(num);
    }

    /// Upsert by `num`.
    pub fn add_node(&mut self, record: NodeRecord) {
        self.nodes.insert(record.num, record);
    }

    pub fn remove_node(&mut self, num: NodeNum) -> Option<NodeRecord> {
        self.node_errors.remove(&num);
        self.nodes.remove(&num)
    }

    /// Clear every node, optionally keeping the radio's own entry. Node errors are
    /// left alone; see [`clear_node_errors`](Self::clear_node_errors).
    pub fn remove_all_nodes(&mut self, keep_my_node: bool) {
        let mine = if keep_my_node {
            self.my_node_num.and_then(|n| self.nodes.remove(&n))
        } else {
            None
        };
        self.nodes.clear();
        if let Some(record) = mine {
            self.nodes.insert(record.num, record);
        }
    }

    /// Refresh link freshness for any packet, creating a minimal record if needed.
    pub fn process_packet(&mut self, meta: &PacketMeta) {
        let time = if meta.time == 0 {
            Utc::now().timestamp().max(0) as u32
        } else {
            meta.time
        };
        let node = self
            .nodes
            .entry(meta.from)
            .or_insert_with(|| NodeRecord::new(meta.from));
        node.last_heard = time;
        node.snr = meta.snr;
        node.channel = meta.channel;
        node.via_mqtt = meta.via_mqtt;
        if meta.hops_away.is_some() {
            node.hops_away = meta.hops_away;
        }
    }

    pub fn add_user(&mut self, from: NodeNum, user: User) {
        self.entry(from).user = Some(user);
    }

    pub fn add_position(&mut self, from: NodeNum, position: Position) {
        self.entry(from).position = Some(position);
    }

    pub fn add_device_metrics(&mut self, from: NodeNum, metrics: DeviceMetrics) {
        self.entry(from).device_metrics = Some(metrics);
    }

    fn entry(&mut self, num: NodeNum) -> &mut NodeRecord {
        self.nodes
            .entry(num)
            .or_insert_with(|| NodeRecord::new(num))
    }

    pub fn get_node(&self, num: NodeNum) -> Option<&NodeRecord> {
        self.nodes.get(&num)
    }

    pub fn get_node_mut(&mut self, num: NodeNum) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(&num)
    }

    pub fn my_node(&self) -> Option<&NodeRecord> {
        self.my_node_num.and_then(|n| self.nodes.get(&n))
    }

    /// Every node except the radio itself, ordered by node number.
    pub fn get_nodes(&self, predicate: Option<&dyn Fn(&NodeRecord) -> bool>) -> Vec<&NodeRecord> {
        self.nodes
            .values()
            .filter(|n| Some(n.num) != self.my_node_num)
            .filter(|n| predicate.map_or(true, |p| p(*n)))
            .collect()
    }

    /// Count of nodes excluding the radio itself.
    pub fn node_count(&self) -> usize {
        self.get_nodes(None).len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    pub fn add_node_error(&mut self, node: NodeNum, error: NodeErrorKind) {
        self.node_errors.insert(node, NodeError { node, error });
    }

    pub fn remove_node_error(&mut self, node: NodeNum) -> Option<NodeError> {
        self.node_errors.remove(&node)
    }

    pub fn node_error(&self, node: NodeNum) -> Option<&NodeError> {
        self.node_errors.get(&node)
    }

    pub fn has_node_error(&self, node: NodeNum) -> bool {
        self.node_errors.contains_key(&node)
    }

    pub fn clear_node_errors(&mut self) {
        self.node_errors.clear();
    }

    pub fn node_errors(&self) -> impl Iterator<Item = &NodeError> {
        self.node_errors.values()
    }

    /// Returns false when the node is unknown.
    pub fn set_key_manually_verified(&mut self, num: NodeNum, verified: bool) -> bool {
        match self.nodes.get_mut(&num) {
            Some(node) => {
                node.is_key_manually_verified = verified;
                true
            }
            None => false,
        }
    }

    /// Fold `old` (the database a previous session of the same radio built) into `self`.
    pub fn merge_from(&mut self, old: NodeDatabase) -> MergeReport {
        let mut report = MergeReport::default();
        let NodeDatabase {
            nodes: old_nodes,
            node_errors: old_errors,
            ..
        } = old;

        // Old errors win on collision.
        for (num, err) in old_errors {
            self.node_errors.insert(num, err);
        }

        for (num, old_record) in old_nodes {
            let Some(new_record) = self.nodes.get(&num) else {
                self.nodes.insert(num, old_record);
                report.copied_from_old += 1;
                continue;
            };

            let old_key = old_record.public_key();
            let new_key = new_record.public_key();
            let keep_old = match (old_key.is_empty(), new_key.is_empty()) {
                (true, _) => false,
                (false, true) => true,
                (false, false) if old_key != new_key => {
                    if !self.node_errors.contains_key(&num) {
                        warn!(
                            "Public key mismatch for {}; keeping previously known identity",
                            describe_node(num, old_record.long_name())
                        );
                        self.node_errors.insert(
                            num,
                            NodeError {
                                node: num,
                                error: NodeErrorKind::PublicKeyMismatch,
                            },
                        );
                        report.key_conflicts += 1;
                    }
                    true
                }
                (false, false) => false,
            };

            if keep_old {
                self.nodes.insert(num, old_record);
                report.kept_old += 1;
            } else {
                report.kept_new += 1;
            }
        }

        debug!(
            "Merged node database for {}: copied={} kept_old={} kept_new={} conflicts={}",
            self.my_node_num
                .map(node_label)
                .unwrap_or_else(|| "unidentified radio".to_string()),
            report.copied_from_old,
            report.kept_old,
            report.kept_new,
            report.key_conflicts
        );
        report
    }
}
