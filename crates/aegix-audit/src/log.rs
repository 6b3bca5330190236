use aegix_core::{AegixError, Address, PaymentSession, Timestamp, SIGNATURE_TIMESTAMP_SKEW_SECS};
use aegix_crypto::{audit_delete_message, decrypt_message, verify_signature, CipherStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Non-decrypted metadata about one audit entry, returned by `list` so a
/// caller can see which sessions exist without an owner signature.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct AuditRecordMeta {
    pub session_id: String,
    pub recorded_at: Timestamp,
    /// The entry's `CipherStore` handle, so a caller can build
    /// `decrypt_message(handle)` and sign it client-side before calling
    /// `decrypt_one`, without ever seeing the plaintext first.
    pub payload_handle: String,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
struct AuditRecord {
    session_id: String,
    recorded_at: Timestamp,
    /// Ciphertext handle over a JSON snapshot of the `PaymentSession` at the
    /// moment it reached a terminal state.
    payload_handle: aegix_core::Handle,
}

fn record_key(owner: &Address, session_id: &str) -> Vec<u8> {
    let mut key = owner.as_bytes().to_vec();
    key.extend_from_slice(session_id.as_bytes());
    key
}

/// Encrypted, append-mostly log of completed (or failed) payment sessions,
/// keyed `owner_bytes || session_id` in a single `sled` tree exactly the way
/// `KeyVault` keys its per-owner trees. Entries are retained indefinitely
/// unless the owner explicitly signs a deletion request.
pub struct AuditLog {
    tree: sled::Tree,
    cipher: Arc<CipherStore>,
}

impl AuditLog {
    pub fn open(db: &sled::Db, cipher: Arc<CipherStore>) -> Result<Self, AegixError> {
        Ok(Self {
            tree: db.open_tree("audit_sessions")?,
            cipher,
        })
    }

    /// Record a terminal `PaymentSession` snapshot. Called by
    /// `PaymentEngine` once a session reaches `Completed` or `Failed`.
    pub fn append(&self, owner: &Address, session: &PaymentSession, now: Timestamp) -> Result<(), AegixError> {
        let json = serde_json::to_vec(session)?;
        let payload_handle = self.cipher.encrypt_bytes(&json)?;
        let record = AuditRecord {
            session_id: session.session_id.clone(),
            recorded_at: now,
            payload_handle,
        };
        let bytes = bincode::serialize(&record).map_err(|e| AegixError::Serialization(e.to_string()))?;
        self.tree.insert(record_key(owner, &session.session_id), bytes)?;
        self.tree.flush()?;
        Ok(())
    }

    /// List session ids + timestamps for `owner` without decrypting anything.
    pub fn list(&self, owner: &Address) -> Result<Vec<AuditRecordMeta>, AegixError> {
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(owner.as_bytes()) {
            let (_, bytes) = item?;
            let record: AuditRecord =
                bincode::deserialize(&bytes).map_err(|e| AegixError::Serialization(e.to_string()))?;
            out.push(AuditRecordMeta {
                session_id: record.session_id,
                recorded_at: record.recorded_at,
                payload_handle: record.payload_handle.0,
            });
        }
        out.sort_by_key(|r| r.recorded_at);
        Ok(out)
    }

    fn get_record(&self, owner: &Address, session_id: &str) -> Result<AuditRecord, AegixError> {
        let bytes = self
            .tree
            .get(record_key(owner, session_id))?
            .ok_or_else(|| AegixError::UnknownPaymentSession(session_id.to_string()))?;
        bincode::deserialize(&bytes).map_err(|e| AegixError::Serialization(e.to_string()))
    }

    /// Owner-attested decrypt of a single session. Requires a signature
    /// over `decrypt:<payload_handle>`.
    pub fn decrypt_one(
        &self,
        owner: &Address,
        session_id: &str,
        signature: &[u8],
    ) -> Result<PaymentSession, AegixError> {
        let record = self.get_record(owner, session_id)?;
        let challenge = decrypt_message(&record.payload_handle.0);
        verify_signature(owner, challenge.as_bytes(), signature)?;
        let plaintext = self.cipher.decrypt_bytes(&record.payload_handle)?;
        serde_json::from_slice(&plaintext).map_err(Into::into)
    }

    /// Owner-attested decrypt of every session. A signature is required per
    /// entry (each entry's handle differs), so callers typically pair this
    /// with `list` to collect handles, sign them client-side, then call
    /// `decrypt_one` per id; this helper is provided for CLI convenience
    /// when the caller has already produced per-entry signatures.
    pub fn decrypt_all(
        &self,
        owner: &Address,
        signatures_by_session: &std::collections::HashMap<String, Vec<u8>>,
    ) -> Result<Vec<PaymentSession>, AegixError> {
        let mut out = Vec::new();
        for meta in self.list(owner)? {
            if let Some(sig) = signatures_by_session.get(&meta.session_id) {
                out.push(self.decrypt_one(owner, &meta.session_id, sig)?);
            }
        }
        Ok(out)
    }

    /// Delete an entry. Requires a signature over
    /// `AEGIX_AUDIT_DELETE::<owner>::<session_id>::<timestamp>`, distinct
    /// from the decrypt challenge, so read access never implies erase access.
    pub fn delete(
        &self,
        owner: &Address,
        session_id: &str,
        timestamp: i64,
        signature: &[u8],
    ) -> Result<(), AegixError> {
        if (chrono::Utc::now().timestamp() - timestamp).abs() > SIGNATURE_TIMESTAMP_SKEW_SECS {
            return Err(AegixError::StaleChallenge {
                timestamp,
                allowed_skew_secs: SIGNATURE_TIMESTAMP_SKEW_SECS,
            });
        }
        let challenge = audit_delete_message(&owner.to_b58(), session_id, timestamp);
        verify_signature(owner, challenge.as_bytes(), signature)?;
        self.tree.remove(record_key(owner, session_id))?;
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegix_core::{PaymentMethod, PaymentStatus};
    use aegix_crypto::{decrypt_message, KeyPair};

    fn sample_session(owner: &Address, session_id: &str) -> PaymentSession {
        PaymentSession {
            session_id: session_id.to_string(),
            owner: owner.clone(),
            pool_id: "pool-1".to_string(),
            method: PaymentMethod::Standard,
            recipient: Address::from_bytes([9u8; 32]),
            amount_micro: 1_000,
            burner_id: None,
            status: PaymentStatus::Completed,
            current_state: "S_Done".to_string(),
            indexer_retry_count: 0,
            tx_signatures: vec![],
            native_funded: 0,
            native_recovered: 0,
            tx_funding_native: None,
            tx_funding_token: None,
            tx_payment: None,
            tx_recovery: None,
            created_at: 0,
            updated_at: 0,
            failure_reason: None,
        }
    }

    #[test]
    fn append_list_and_decrypt_round_trip() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let cipher = Arc::new(CipherStore::new([5u8; 32]));
        let log = AuditLog::open(&db, cipher).unwrap();
        let owner_kp = KeyPair::generate();
        let session = sample_session(&owner_kp.address, "sess-1");

        log.append(&owner_kp.address, &session, 100).unwrap();
        let listed = log.list(&owner_kp.address).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id, "sess-1");

        let record = log.get_record(&owner_kp.address, "sess-1").unwrap();
        let challenge = decrypt_message(&record.payload_handle.0);
        let sig = owner_kp.sign(challenge.as_bytes());
        let decrypted = log
            .decrypt_one(&owner_kp.address, "sess-1", &sig.to_bytes())
            .unwrap();
        assert_eq!(decrypted.session_id, "sess-1");
    }

    #[test]
    fn delete_requires_distinct_signature() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let cipher = Arc::new(CipherStore::new([6u8; 32]));
        let log = AuditLog::open(&db, cipher).unwrap();
        let owner_kp = KeyPair::generate();
        let session = sample_session(&owner_kp.address, "sess-1");
        log.append(&owner_kp.address, &session, 100).unwrap();

        let now = chrono::Utc::now().timestamp();
        let bogus_sig = [0u8; 64];
        assert!(log.delete(&owner_kp.address, "sess-1", now, &bogus_sig).is_err());

        let challenge = audit_delete_message(&owner_kp.address.to_b58(), "sess-1", now);
        let sig = owner_kp.sign(challenge.as_bytes());
        log.delete(&owner_kp.address, "sess-1", now, &sig.to_bytes()).unwrap();
        assert!(log.list(&owner_kp.address).unwrap().is_empty());
    }
}
