//! Process-wide counters for the state layer. Cheap relaxed atomics; read with
//! [`snapshot`] for diagnostics output.
use std::sync::atomic::{AtomicU64, Ordering};

static EVICTIONS: AtomicU64 = AtomicU64::new(0);
static NODE_DB_MERGES: AtomicU64 = AtomicU64::new(0);
static IDENTITY_CONFLICTS: AtomicU64 = AtomicU64::new(0);
static ADMIN_SENT: AtomicU64 = AtomicU64::new(0);
static ADMIN_QUEUED: AtomicU64 = AtomicU64::new(0);
static ADMIN_SEND_FAILED: AtomicU64 = AtomicU64::new(0);
static SNAPSHOTS_SAVED: AtomicU64 = AtomicU64::new(0);
static ORPHANS_PRUNED: AtomicU64 = AtomicU64::new(0);

pub fn add_evictions(n: usize) {
    EVICTIONS.fetch_add(n as u64, Ordering::Relaxed);
}
pub fn inc_node_db_merges() {
    NODE_DB_MERGES.fetch_add(1, Ordering::Relaxed);
}
pub fn add_identity_conflicts(n: usize) {
    IDENTITY_CONFLICTS.fetch_add(n as u64, Ordering::Relaxed);
}
pub fn inc_admin_sent() {
    ADMIN_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_admin_queued() {
    ADMIN_QUEUED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_admin_send_failed() {
    ADMIN_SEND_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_snapshots_saved() {
    SNAPSHOTS_SAVED.fetch_add(1, Ordering::Relaxed);
}
pub fn add_orphans_pruned(n: usize) {
    ORPHANS_PRUNED.fetch_add(n as u64, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub evictions: u64,
    pub node_db_merges: u64,
    pub identity_conflicts: u64,
    pub admin_sent: u64,
    pub admin_queued: u64,
    pub admin_send_failed: u64,
    pub snapshots_saved: u64,
    pub orphans_pruned: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        evictions: EVICTIONS.load(Ordering::Relaxed),
        node_db_merges: NODE_DB_MERGES.load(Ordering::Relaxed),
        identity_conflicts: IDENTITY_CONFLICTS.load(Ordering::Relaxed),
        admin_sent: ADMIN_SENT.load(Ordering::Relaxed),
        admin_queued: ADMIN_QUEUED.load(Ordering::Relaxed),
        admin_send_failed: ADMIN_SEND_FAILED.load(Ordering::Relaxed),
        snapshots_saved: SNAPSHOTS_SAVED.load(Ordering::Relaxed),
        orphans_pruned: ORPHANS_PRUNED.load(Ordering::Relaxed),
    }
}
