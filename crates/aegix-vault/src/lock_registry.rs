use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-id serialization locks, grouped as an owned registry field rather
/// than a module-level static. Each id (pool id, session id) gets its own
/// mutex so unrelated pools never contend on the same lock.
pub struct LockRegistry {
    locks: DashMap<String, (Arc<Mutex<()>>, i64)>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Fetch (or create) the mutex for `id`, recording the access time so
    /// `prune_idle` can later reclaim entries nobody has touched recently.
    pub fn get(&self, id: &str, now: i64) -> Arc<Mutex<()>> {
        let mut entry = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| (Arc::new(Mutex::new(())), now));
        entry.1 = now;
        entry.0.clone()
    }

    /// Drop entries whose mutex is uncontended (no other `Arc` clone held
    /// elsewhere) and whose last access predates `now - idle_secs`.
    pub fn prune_idle(&self, now: i64, idle_secs: i64) -> usize {
        let stale: Vec<String> = self
            .locks
            .iter()
            .filter(|e| now - e.value().1 > idle_secs && Arc::strong_count(&e.value().0) == 1)
            .map(|e| e.key().clone())
            .collect();
        let count = stale.len();
        for key in stale {
            self.locks.remove(&key);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_returns_same_mutex() {
        let reg = LockRegistry::new();
        let a = reg.get("pool-1", 0);
        let b = reg.get("pool-1", 0);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn prune_removes_idle_uncontended_entries() {
        let reg = LockRegistry::new();
        let _held = reg.get("pool-held", 0);
        {
            let _dropped = reg.get("pool-dropped", 0);
        }
        let pruned = reg.prune_idle(10_000, 10);
        assert_eq!(pruned, 1);
        assert_eq!(reg.len(), 1);
    }
}
