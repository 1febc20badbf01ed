//! Baseline configuration plus pending edits.
//!
//! The radio's confirmed configuration (the *baseline*) is kept separately from
//! what the operator has edited but not yet applied. Readers ask for the
//! *effective* value, a shallow field merge in which pending fields win.

use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{Result, StateError};
use crate::protocol::{Channel, ChangeKey, ConfigVariant, Fields};

/// Highest channel slot a Meshtastic radio exposes.
pub const MAX_CHANNEL_INDEX: u32 = 7;

/// Which configuration variants have arrived this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigProgress {
    received: BTreeSet<ConfigVariant>,
    total: usize,
}

impl Default for ConfigProgress {
    fn default() -> Self {
        Self {
            received: BTreeSet::new(),
            total: ConfigVariant::tracked_total(),
        }
    }
}

impl ConfigProgress {
    pub fn mark(&mut self, variant: ConfigVariant) {
        self.received.insert(variant);
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn has_received(&self, variant: ConfigVariant) -> bool {
        self.received.contains(&variant)
    }

    /// Sync completeness, 0-100.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let pct = (self.received.len() as f64 / self.total as f64 * 100.0).round();
        pct.min(100.0) as u8
    }

    pub fn reset(&mut self) {
        self.received.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverlay {
    baseline: BTreeMap<ConfigVariant, Fields>,
    channels: BTreeMap<u32, Channel>,
    pending: BTreeMap<ChangeKey, Fields>,
    progress: ConfigProgress,
}

impl ConfigOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the confirmed value for `variant`. Untracked variants are dropped and
    /// `false` is returned.
    pub fn set_baseline(&mut self, variant: ConfigVariant, value: Fields) -> bool {
        if !variant.is_tracked() {
            trace!("Ignoring untracked config variant {}", variant.case_name());
            return false;
        }
        self.baseline.insert(variant, value);
        self.progress.mark(variant);
        true
    }

    pub fn baseline(&self, variant: ConfigVariant) -> Option<&Fields> {
        self.baseline.get(&variant)
    }

    pub fn baselines(&self) -> impl Iterator<Item = (&ConfigVariant, &Fields)> {
        self.baseline.iter()
    }

    /// Upsert a pending edit. Edits to untracked variants are dropped.
    pub fn set_change(&mut self, key: ChangeKey, value: Fields) -> Result<()> {
        match key {
            ChangeKey::Channel(index) if index > MAX_CHANNEL_INDEX => {
                return Err(StateError::InvalidChannel(index))
            }
            _ => {}
        }
        if key.variant().is_some_and(|v| !v.is_tracked()) {
            return Ok(());
        }
        debug!("Pending change staged for {:?}", key);
        self.pending.insert(key, value);
        Ok(())
    }

    pub fn remove_change(&mut self, key: ChangeKey) -> Option<Fields> {
        self.pending.remove(&key)
    }

    pub fn clear_all_changes(&mut self) {
        self.pending.clear();
    }

    pub fn has_change(&self, key: ChangeKey) -> bool {
        self.pending.contains_key(&key)
    }

    pub fn change(&self, key: ChangeKey) -> Option<&Fields> {
        self.pending.get(&key)
    }

    pub fn pending_changes(&self) -> impl Iterator<Item = (&ChangeKey, &Fields)> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Baseline fields overlaid with pending fields of the same variant.
    pub fn get_effective(&self, variant: ConfigVariant) -> Option<Fields> {
        if !variant.is_tracked() {
            return None;
        }
        let base = self.baseline.get(&variant);
        let pending = self.pending.get(&ChangeKey::from(variant));
        merge_fields(base, pending)
    }

    pub fn set_channel(&mut self, channel: Channel) -> Result<()> {
        if channel.index > MAX_CHANNEL_INDEX {
            return Err(StateError::InvalidChannel(channel.index));
        }
        self.channels.insert(channel.index, channel);
        Ok(())
    }

    pub fn channel(&self, index: u32) -> Option<&Channel> {
        self.channels.get(&index)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Channel baseline with any pending channel edit applied.
    pub fn effective_channel(&self, index: u32) -> Result<Option<Channel>> {
        let base = match self.channels.get(&index) {
            Some(ch) => Some(channel_fields(ch)?),
            None => None,
        };
        let merged = merge_fields(base.as_ref(), self.pending.get(&ChangeKey::Channel(index)));
        match merged {
            Some(mut fields) => {
                fields.insert("index".to_string(), index.into());
                Ok(Some(serde_json::from_value(serde_json::Value::Object(fields))?))
            }
            None => Ok(None),
        }
    }

    pub fn progress(&self) -> &ConfigProgress {
        &self.progress
    }

    pub fn reset_progress(&mut self) {
        self.progress.reset();
    }
}

fn channel_fields(channel: &Channel) -> Result<Fields> {
    match serde_json::to_value(channel)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(Fields::new()),
    }
}

fn merge_fields(base: Option<&Fields>, pending: Option<&Fields>) -> Option<Fields> {
    match (base, pending) {
        (None, None) => None,
        (Some(b), None) => Some(b.clone()),
        (None, Some(p)) => Some(p.clone()),
        (Some(b), Some(p)) => {
            let mut out = b.clone();
            for (k, v) in p {
                out.insert(k.clone(), v.clone());
            }
            Some(out)
        }
    }
}
