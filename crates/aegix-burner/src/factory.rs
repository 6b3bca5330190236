use aegix_core::{AegixError, Burner, Handle, PaymentSessionId, Timestamp};
use aegix_crypto::{burner_proof_hash, CipherStore, KeyPair};

/// Generates ephemeral, single-use keypairs used to route one payment each,
/// breaking the on-chain link between the funding pool and the recipient.
/// A burner is generated fresh per payment session and is never reissued —
/// `consume` is the only way to mark one spent, and spent burners are never
/// handed back out by `KeyVault` or `PaymentEngine`.
pub struct BurnerFactory {
    cipher: std::sync::Arc<CipherStore>,
}

impl BurnerFactory {
    pub fn new(cipher: std::sync::Arc<CipherStore>) -> Self {
        Self { cipher }
    }

    /// Create a new burner bound to `payment_session_id`. The returned
    /// `Burner` record and the live `KeyPair` (needed immediately to sign
    /// the funding transaction) are both returned; callers must persist the
    /// `Burner` record before using the keypair so a crash mid-payment
    /// leaves a recoverable trail.
    pub fn new_burner(&self, payment_session_id: &PaymentSessionId, now: Timestamp) -> Result<(Burner, KeyPair), AegixError> {
        let keypair = KeyPair::generate();
        let proof_hash = burner_proof_hash(payment_session_id, keypair.address.as_bytes());
        let secret_handle: Handle = self.cipher.encrypt_bytes(keypair.secret_key_bytes())?;
        let burner = Burner {
            burner_id: keypair.address.to_b58(),
            address: keypair.address.clone(),
            secret_handle,
            proof_hash,
            created_at: now,
            consumed_at: None,
        };
        Ok((burner, keypair))
    }

    /// Decrypt a previously created burner's secret key, e.g. to resume a
    /// paused Maximum-Privacy session at `M3_DecompressAndDeliver`.
    pub fn keypair_for(&self, burner: &Burner) -> Result<KeyPair, AegixError> {
        let secret_bytes = self.cipher.decrypt_bytes(&burner.secret_handle)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&secret_bytes[..32.min(secret_bytes.len())]);
        Ok(KeyPair::from_secret_bytes(arr))
    }

    /// Mark a burner consumed. Idempotent: consuming an already-consumed
    /// burner is a no-op rather than an error, since the cleanup scheduler
    /// and the payment engine may both observe the same terminal state.
    pub fn consume(&self, burner: &mut Burner, now: Timestamp) {
        if burner.consumed_at.is_none() {
            burner.consumed_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn new_burner_binds_proof_hash_to_session() {
        let cipher = Arc::new(CipherStore::new([4u8; 32]));
        let factory = BurnerFactory::new(cipher);
        let (burner_a, _) = factory.new_burner(&"session-a".to_string(), 0).unwrap();
        let (burner_b, _) = factory.new_burner(&"session-b".to_string(), 0).unwrap();
        assert_ne!(burner_a.proof_hash, burner_b.proof_hash);
    }

    #[test]
    fn consume_is_idempotent() {
        let cipher = Arc::new(CipherStore::new([4u8; 32]));
        let factory = BurnerFactory::new(cipher);
        let (mut burner, _) = factory.new_burner(&"session-a".to_string(), 100).unwrap();
        factory.consume(&mut burner, 200);
        factory.consume(&mut burner, 300);
        assert_eq!(burner.consumed_at, Some(200));
    }
}
