//! Coordination-store and leader-election seams.
//!
//! The controller persists admin consumption progress in a hierarchical
//! key-value coordination store with atomic single-key puts, and gates
//! consumption on an external leader-election signal. Both collaborators
//! are traits; the in-memory implementations back tests and local mode.

use crate::core::error::{StrataError, StrataResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Hierarchical key-value store with atomic single-key put.
pub trait CoordinationStore: Send + Sync {
    fn put(&self, key: &str, value: Vec<u8>) -> StrataResult<()>;

    fn get(&self, key: &str) -> StrataResult<Option<Vec<u8>>>;
}

/// In-memory coordination store.
#[derive(Debug, Default)]
pub struct MemoryCoordination {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail, to exercise transport-error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }
}

impl CoordinationStore for MemoryCoordination {
    fn put(&self, key: &str, value: Vec<u8>) -> StrataResult<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(StrataError::transport(format!(
                "coordination write failed for {key}"
            )));
        }
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> StrataResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }
}

/// Leader-election signal for one cluster.
///
/// Election itself (ephemeral nodes, sessions) is a collaborator concern;
/// the consumer only asks whether this process currently leads.
pub trait LeaderElection: Send + Sync {
    fn is_leader(&self, cluster: &str) -> bool;
}

/// Settable leadership signal for tests and single-process deployments.
#[derive(Debug)]
pub struct StaticLeadership {
    leader: AtomicBool,
}

impl StaticLeadership {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::Release);
    }
}

impl LeaderElection for StaticLeadership {
    fn is_leader(&self, _cluster: &str) -> bool {
        self.leader.load(Ordering::Acquire)
    }
}
