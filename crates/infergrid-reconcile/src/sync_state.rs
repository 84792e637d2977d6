//! The persisted reconciliation lock/progress blob.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Blob key the sync state lives under.
pub const SYNC_STATE_KEY: &str = "deployment_sync_state";

/// Cross-cycle reconciliation state. Keys are deployment table keys
/// (`{cluster_id}/{namespace}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    /// In-flight locks: key to lock acquisition time (unix seconds).
    pub active_syncs: HashMap<String, u64>,
    /// Last successful sync per deployment.
    pub last_sync_times: HashMap<String, u64>,
    /// Last error message per deployment that failed its sync.
    pub failed_deployments: HashMap<String, String>,
}

impl SyncState {
    /// Removes locks older than `stale_after_secs`. A crashed cycle
    /// must not block a deployment forever.
    pub fn drop_stale_locks(&mut self, now: u64, stale_after_secs: u64) -> usize {
        let before = self.active_syncs.len();
        self.active_syncs
            .retain(|_, acquired| now.saturating_sub(*acquired) < stale_after_secs);
        before - self.active_syncs.len()
    }

    /// Whether this deployment has ever completed a sync.
    pub fn seen_before(&self, key: &str) -> bool {
        self.last_sync_times.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_locks_are_dropped_fresh_ones_kept() {
        let mut state = SyncState::default();
        state.active_syncs.insert("c1/ns1".to_string(), 1_000);
        state.active_syncs.insert("c1/ns2".to_string(), 2_500);
        let dropped = state.drop_stale_locks(3_000, 1_800);
        assert_eq!(dropped, 1);
        assert!(!state.active_syncs.contains_key("c1/ns1"));
        assert!(state.active_syncs.contains_key("c1/ns2"));
    }
}
