use aegix_core::{
    AegixError, Address, Pool, PoolId, PoolStatus, RecoveryPool, SessionId, SessionKey,
    SessionStatus, Timestamp, SIGNATURE_TIMESTAMP_SKEW_SECS,
};
use aegix_crypto::{export_key_message, pool_auth_message, session_grant_message, verify_signature, CipherStore, KeyPair};
use std::sync::Arc;

use crate::db::VaultDb;
use crate::lock_registry::LockRegistry;

/// Encrypted-at-rest registry of server-held pool keypairs, recovery pool
/// keypairs, and scoped session keys. Every mutating operation serializes
/// through `LockRegistry` so concurrent requests against the same pool
/// cannot interleave a read-modify-write.
pub struct KeyVault {
    db: VaultDb,
    cipher: Arc<CipherStore>,
    locks: LockRegistry,
}

impl KeyVault {
    pub fn new(db: VaultDb, cipher: Arc<CipherStore>) -> Self {
        Self {
            db,
            cipher,
            locks: LockRegistry::new(),
        }
    }

    fn now() -> Timestamp {
        chrono::Utc::now().timestamp()
    }

    /// Reject a challenge timestamp too far from the server clock in either
    /// direction, so a captured signature cannot be replayed indefinitely.
    fn check_fresh(timestamp: i64) -> Result<(), AegixError> {
        if (Self::now() - timestamp).abs() > SIGNATURE_TIMESTAMP_SKEW_SECS {
            return Err(AegixError::StaleChallenge {
                timestamp,
                allowed_skew_secs: SIGNATURE_TIMESTAMP_SKEW_SECS,
            });
        }
        Ok(())
    }

    /// Return the owner's pool, creating a fresh Ed25519 keypair for it if
    /// this is the first time this `pool_id` has been seen for this owner.
    /// Freshly created pools start `PoolStatus::Created`.
    pub async fn get_or_create_pool(&self, owner: &Address, pool_id: &str) -> Result<Pool, AegixError> {
        let lock = self.locks.get(pool_id, Self::now());
        let _guard = lock.lock().await;

        if let Some(pool) = self.db.get_pool(owner, pool_id)? {
            return Ok(pool);
        }
        let keypair = KeyPair::generate();
        let secret_handle = self.cipher.encrypt_bytes(keypair.secret_key_bytes())?;
        let pool = Pool {
            pool_id: pool_id.to_string(),
            owner: owner.clone(),
            address: keypair.address.clone(),
            secret_handle,
            status: PoolStatus::Created,
            created_at: Self::now(),
            last_unlocked_at: None,
        };
        self.db.put_pool(&pool)?;
        Ok(pool)
    }

    pub fn get_pool(&self, owner: &Address, pool_id: &str) -> Result<Pool, AegixError> {
        self.db
            .get_pool(owner, pool_id)?
            .ok_or_else(|| AegixError::UnknownPool(pool_id.to_string()))
    }

    pub fn list_pools(&self, owner: &Address) -> Result<Vec<Pool>, AegixError> {
        self.db.list_pools_for_owner(owner)
    }

    /// Owner proves control of the pool by signing `pool_auth_message(owner,
    /// timestamp)`; on success the pool transitions to `Active` and the
    /// decrypted keypair is returned for immediate use by the caller (never
    /// persisted in decrypted form).
    pub async fn unlock_pool(
        &self,
        owner: &Address,
        pool_id: &str,
        timestamp: i64,
        signature: &[u8],
    ) -> Result<KeyPair, AegixError> {
        let lock = self.locks.get(pool_id, Self::now());
        let _guard = lock.lock().await;

        Self::check_fresh(timestamp)?;
        let challenge = pool_auth_message(&owner.to_b58(), timestamp);
        verify_signature(owner, challenge.as_bytes(), signature)?;

        let mut pool = self.get_pool(owner, pool_id)?;
        let secret_bytes = self.cipher.decrypt_bytes(&pool.secret_handle)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&secret_bytes[..32.min(secret_bytes.len())]);
        let keypair = KeyPair::from_secret_bytes(arr);

        pool.status = PoolStatus::Active;
        pool.last_unlocked_at = Some(Self::now());
        self.db.put_pool(&pool)?;

        Ok(keypair)
    }

    /// Decrypt the signing keypair for a pool that is already `Active`
    /// (i.e. was previously unlocked and has not been locked since), without
    /// requiring a fresh owner signature on every call. `PaymentEngine` uses
    /// this for every payment a `SessionKey` authorizes — re-signing on each
    /// payment would defeat the point of delegating spending authority.
    pub fn signing_keypair_for_active_pool(&self, owner: &Address, pool_id: &str) -> Result<KeyPair, AegixError> {
        let pool = self.get_pool(owner, pool_id)?;
        match pool.status {
            PoolStatus::Active => {
                let secret_bytes = self.cipher.decrypt_bytes(&pool.secret_handle)?;
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&secret_bytes[..32.min(secret_bytes.len())]);
                Ok(KeyPair::from_secret_bytes(arr))
            }
            PoolStatus::Locked => Err(AegixError::PoolLocked {
                pool_id: pool_id.to_string(),
            }),
            PoolStatus::Created | PoolStatus::Funded => Err(AegixError::NeedsReauth {
                session_id: pool_id.to_string(),
                reason: "pool has never been unlocked".to_string(),
            }),
        }
    }

    /// Lock a pool, requiring `unlock_pool` to be called again before it can
    /// sign. Used by `pool.withdraw`'s safety hold and by caller-initiated
    /// locking.
    pub fn lock_pool(&self, owner: &Address, pool_id: &str) -> Result<(), AegixError> {
        let mut pool = self.get_pool(owner, pool_id)?;
        pool.status = PoolStatus::Locked;
        self.db.put_pool(&pool)
    }

    /// Mark a pool `Funded` once its funding transfer has been observed
    /// confirmed on-chain. A no-op if the pool has already progressed past
    /// `Created` (e.g. a second `pool.confirm_funding` call after the pool
    /// was later unlocked).
    pub fn mark_pool_funded(&self, owner: &Address, pool_id: &str) -> Result<(), AegixError> {
        let mut pool = self.get_pool(owner, pool_id)?;
        if pool.status == PoolStatus::Created {
            pool.status = PoolStatus::Funded;
            self.db.put_pool(&pool)?;
        }
        Ok(())
    }

    /// Export the pool's raw secret key. Requires a signature over
    /// `export_key_message`, distinct from the unlock challenge so export
    /// authority can be scoped separately in the future.
    pub fn export_pool_key(
        &self,
        owner: &Address,
        pool_id: &str,
        timestamp: i64,
        signature: &[u8],
    ) -> Result<[u8; 32], AegixError> {
        Self::check_fresh(timestamp)?;
        let challenge = export_key_message(&owner.to_b58(), timestamp);
        verify_signature(owner, challenge.as_bytes(), signature)?;

        let pool = self.get_pool(owner, pool_id)?;
        let secret_bytes = self.cipher.decrypt_bytes(&pool.secret_handle)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&secret_bytes[..32.min(secret_bytes.len())]);
        Ok(arr)
    }

    pub fn get_or_create_recovery_pool(
        &self,
        owner: &Address,
        min_required_native: u128,
    ) -> Result<RecoveryPool, AegixError> {
        if let Some(rp) = self.db.get_recovery_pool(owner)? {
            return Ok(rp);
        }
        let keypair = KeyPair::generate();
        let secret_handle = self.cipher.encrypt_bytes(keypair.secret_key_bytes())?;
        let rp = RecoveryPool {
            owner: owner.clone(),
            address: keypair.address.clone(),
            secret_handle,
            min_required_native,
            created_at: Self::now(),
        };
        self.db.put_recovery_pool(&rp)?;
        Ok(rp)
    }

    /// Read-only lookup, unlike `get_or_create_recovery_pool` which creates
    /// one on a miss. Used by `recovery.status`, which must not conjure a
    /// Recovery Pool into existence just by being asked about it.
    pub fn get_recovery_pool(&self, owner: &Address) -> Result<Option<RecoveryPool>, AegixError> {
        self.db.get_recovery_pool(owner)
    }

    pub fn recovery_keypair(&self, owner: &Address) -> Result<KeyPair, AegixError> {
        let rp = self
            .db
            .get_recovery_pool(owner)?
            .ok_or_else(|| AegixError::UnknownPool("recovery-pool".to_string()))?;
        let secret_bytes = self.cipher.decrypt_bytes(&rp.secret_handle)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&secret_bytes[..32.min(secret_bytes.len())]);
        Ok(KeyPair::from_secret_bytes(arr))
    }

    /// Grant a scoped session key. `expires_at` must be the exact value the
    /// owner signed over in `session_grant_message` — it is verified against
    /// the signature, not recomputed from the server's clock, so a duration
    /// that only looks valid after network latency cannot silently break
    /// signature verification. `max_duration_secs` is enforced as a
    /// post-verification bound: a signed `expires_at` further out than that
    /// is rejected outright rather than silently clamped, since clamping
    /// would store a session whose `expires_at` no longer matches what the
    /// owner actually signed.
    pub fn create_session_key(
        &self,
        owner: &Address,
        pool_id: &PoolId,
        daily_limit_micro: u128,
        max_per_tx: u128,
        expires_at: i64,
        max_duration_secs: i64,
        signature: &[u8],
    ) -> Result<SessionKey, AegixError> {
        let now = Self::now();
        let challenge = session_grant_message(&owner.to_b58(), pool_id, daily_limit_micro, max_per_tx, expires_at);
        verify_signature(owner, challenge.as_bytes(), signature)?;

        if expires_at <= now {
            return Err(AegixError::InvalidArgument(
                "session expires_at must be in the future".to_string(),
            ));
        }
        if expires_at - now > max_duration_secs {
            return Err(AegixError::InvalidArgument(format!(
                "session duration of {}s exceeds the maximum of {max_duration_secs}s",
                expires_at - now
            )));
        }

        let session_id = uuid_like(owner, pool_id, now);
        let session = SessionKey {
            session_id,
            owner: owner.clone(),
            pool_id: pool_id.clone(),
            daily_limit_micro,
            max_per_tx: max_per_tx.min(daily_limit_micro),
            spend_period_secs: 24 * 3600,
            granted_at: now,
            expires_at,
            status: SessionStatus::Active,
        };
        self.db.put_session_key(&session)?;
        Ok(session)
    }

    pub fn get_session_key(&self, session_id: &SessionId) -> Result<SessionKey, AegixError> {
        self.db
            .get_session_key(session_id)?
            .ok_or_else(|| AegixError::UnknownSession(session_id.clone()))
    }

    pub fn revoke_session_key(&self, owner: &Address, session_id: &SessionId) -> Result<(), AegixError> {
        let mut session = self.get_session_key(session_id)?;
        if &session.owner != owner {
            return Err(AegixError::PermissionDenied(
                "session does not belong to this owner".to_string(),
            ));
        }
        session.status = SessionStatus::Revoked;
        self.db.put_session_key(&session)
    }

    /// Mark every session key past its `expires_at` as `Expired`. Called by
    /// `CleanupScheduler` on its tick.
    pub fn expire_stale_sessions(&self, pool_id: &PoolId) -> Result<usize, AegixError> {
        let now = Self::now();
        let mut count = 0;
        for mut session in self.db.list_session_keys_for_pool(pool_id)? {
            if session.status == SessionStatus::Active && session.expires_at <= now {
                session.status = SessionStatus::Expired;
                self.db.put_session_key(&session)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Mark every session key past its `expires_at` as `Expired`, across
    /// every pool, returning the ids that transitioned so the caller can
    /// drop their `BudgetLedger` bookkeeping too. `CleanupScheduler`'s
    /// single entry point for session expiry — it does not need to
    /// enumerate pools itself.
    pub fn expire_all_stale_sessions(&self) -> Result<Vec<SessionId>, AegixError> {
        let now = Self::now();
        let mut expired = Vec::new();
        for mut session in self.db.list_all_session_keys()? {
            if session.status == SessionStatus::Active && session.expires_at <= now {
                session.status = SessionStatus::Expired;
                self.db.put_session_key(&session)?;
                expired.push(session.session_id);
            }
        }
        Ok(expired)
    }

    pub fn prune_idle_locks(&self, idle_secs: i64) -> usize {
        self.locks.prune_idle(Self::now(), idle_secs)
    }

    /// Force every persisted pool back to `Locked`, regardless of the
    /// status it held when the process last exited. Called once from
    /// `aegix-node`'s startup sequence, before the RPC server starts
    /// accepting requests, so an `Active` pool can never survive a
    /// restart without the owner re-proving control via `unlock_pool`.
    pub fn lock_all_pools_on_reload(&self) -> Result<usize, AegixError> {
        let mut count = 0;
        for mut pool in self.db.list_all_pools()? {
            if pool.status != PoolStatus::Locked {
                pool.status = PoolStatus::Locked;
                self.db.put_pool(&pool)?;
                count += 1;
            }
        }
        Ok(count)
    }
}

fn uuid_like(owner: &Address, pool_id: &str, now: i64) -> String {
    let mut buf = owner.as_bytes().to_vec();
    buf.extend_from_slice(pool_id.as_bytes());
    buf.extend_from_slice(&now.to_le_bytes());
    hex::encode(aegix_crypto::blake3_hash(&buf))
}
