use aegix_core::{AegixError, Address, PoolId, RecoveryPool, SessionId, SessionKey};
use aegix_core::Pool;
use std::path::Path;

/// Persistent keypair registry backed by `sled` (pure-Rust, no C dependencies).
///
/// Named trees:
///   pools           — `owner_bytes || pool_id` → bincode(Pool)
///   recovery_pools  — owner bytes              → bincode(RecoveryPool)
///   session_keys    — session_id utf8 bytes    → bincode(SessionKey)
pub struct VaultDb {
    pools: sled::Tree,
    recovery_pools: sled::Tree,
    session_keys: sled::Tree,
}

fn pool_key(owner: &Address, pool_id: &str) -> Vec<u8> {
    let mut k = owner.as_bytes().to_vec();
    k.extend_from_slice(pool_id.as_bytes());
    k
}

impl VaultDb {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, AegixError> {
        let db = sled::open(data_dir)?;
        Ok(Self {
            pools: db.open_tree("pools")?,
            recovery_pools: db.open_tree("recovery_pools")?,
            session_keys: db.open_tree("session_keys")?,
        })
    }

    // ── Pools ────────────────────────────────────────────────────────────────

    pub fn put_pool(&self, pool: &Pool) -> Result<(), AegixError> {
        let key = pool_key(&pool.owner, &pool.pool_id);
        let bytes = bincode::serialize(pool)?;
        self.pools.insert(key, bytes)?;
        self.pools.flush()?;
        Ok(())
    }

    pub fn get_pool(&self, owner: &Address, pool_id: &str) -> Result<Option<Pool>, AegixError> {
        let key = pool_key(owner, pool_id);
        match self.pools.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_pools_for_owner(&self, owner: &Address) -> Result<Vec<Pool>, AegixError> {
        let mut out = Vec::new();
        for item in self.pools.scan_prefix(owner.as_bytes()) {
            let (_, bytes) = item?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    /// Every persisted pool across every owner, used once at startup to
    /// force every pool back to `Locked` regardless of the status it was
    /// in when the process last shut down.
    pub fn list_all_pools(&self) -> Result<Vec<Pool>, AegixError> {
        let mut out = Vec::new();
        for item in self.pools.iter() {
            let (_, bytes) = item?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    // ── Recovery pools ───────────────────────────────────────────────────────

    pub fn put_recovery_pool(&self, rp: &RecoveryPool) -> Result<(), AegixError> {
        let bytes = bincode::serialize(rp)?;
        self.recovery_pools.insert(rp.owner.as_bytes(), bytes)?;
        self.recovery_pools.flush()?;
        Ok(())
    }

    pub fn get_recovery_pool(&self, owner: &Address) -> Result<Option<RecoveryPool>, AegixError> {
        match self.recovery_pools.get(owner.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Session keys ─────────────────────────────────────────────────────────

    pub fn put_session_key(&self, sk: &SessionKey) -> Result<(), AegixError> {
        let bytes = bincode::serialize(sk)?;
        self.session_keys.insert(sk.session_id.as_bytes(), bytes)?;
        self.session_keys.flush()?;
        Ok(())
    }

    pub fn get_session_key(&self, session_id: &SessionId) -> Result<Option<SessionKey>, AegixError> {
        match self.session_keys.get(session_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_session_keys_for_pool(&self, pool_id: &PoolId) -> Result<Vec<SessionKey>, AegixError> {
        let mut out = Vec::new();
        for item in self.session_keys.iter() {
            let (_, bytes) = item?;
            let sk: SessionKey = bincode::deserialize(&bytes)?;
            if &sk.pool_id == pool_id {
                out.push(sk);
            }
        }
        Ok(out)
    }

    /// Every persisted session key across every pool and owner, used by
    /// `CleanupScheduler` so it does not need to enumerate pools first.
    pub fn list_all_session_keys(&self) -> Result<Vec<SessionKey>, AegixError> {
        let mut out = Vec::new();
        for item in self.session_keys.iter() {
            let (_, bytes) = item?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }
}
