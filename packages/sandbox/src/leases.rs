// ABOUTME: In-process record of which sandbox instances are held by in-flight requests
// ABOUTME: Only tracks leases; instance membership always comes from the runtime listing

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub app_id: String,
    pub pool_name: String,
}

#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: Mutex<HashMap<String, LeaseRecord>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LeaseRecord>> {
        // Entries are plain data; a poisoned guard still holds a consistent map
        self.leases.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark an instance leased; false if someone else already holds it
    pub fn try_acquire(&self, sandbox_id: &str, app_id: &str, pool_name: &str) -> bool {
        let mut leases = self.lock();
        if leases.contains_key(sandbox_id) {
            return false;
        }
        leases.insert(
            sandbox_id.to_string(),
            LeaseRecord {
                app_id: app_id.to_string(),
                pool_name: pool_name.to_string(),
            },
        );
        true
    }

    /// Drop a lease, returning what it recorded
    pub fn release(&self, sandbox_id: &str) -> Option<LeaseRecord> {
        self.lock().remove(sandbox_id)
    }

    pub fn is_leased(&self, sandbox_id: &str) -> bool {
        self.lock().contains_key(sandbox_id)
    }

    pub fn leased_in_pool(&self, app_id: &str, pool_name: &str) -> HashSet<String> {
        self.lock()
            .iter()
            .filter(|(_, r)| r.app_id == app_id && r.pool_name == pool_name)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Forget leases on instances the runtime no longer reports
    pub fn retain_live(&self, app_id: &str, live: &HashSet<String>) {
        self.lock()
            .retain(|id, r| r.app_id != app_id || live.contains(id));
    }
}
