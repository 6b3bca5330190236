use aegix_core::{AegixError, Address, Handle};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

use crate::challenge::decrypt_message;
use crate::hash::blake3_hash;
use crate::signing::verify_signature;

const HANDLE_VERSION: &str = "v1";

/// AEAD envelope around every secret Aegix persists: pool secret keys,
/// burner secret keys, audit-log bodies. Ciphertext is returned as an opaque
/// `Handle` string safe to log and store inline in `sled`.
///
/// Keyed by a single process secret (`AEGIX_CIPHER_KEY`, 32 bytes hex) read
/// once at startup; never logged, never written back to storage.
pub struct CipherStore {
    key: Zeroizing<[u8; 32]>,
}

impl CipherStore {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Build a `CipherStore` from `AEGIX_CIPHER_KEY` (32 bytes hex) if set,
    /// otherwise a fresh random key — suitable only for `BackendMode::Simulation`,
    /// since the key does not survive a restart.
    pub fn from_env_or_random() -> Self {
        match std::env::var("AEGIX_CIPHER_KEY") {
            Ok(hex_key) => {
                let bytes = hex::decode(hex_key.trim()).expect("AEGIX_CIPHER_KEY must be valid hex");
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes[..32.min(bytes.len())]);
                Self::new(key)
            }
            Err(_) => {
                let mut key = [0u8; 32];
                rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut key);
                Self::new(key)
            }
        }
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new((&*self.key).into())
    }

    /// Encrypt arbitrary plaintext bytes, returning an opaque versioned handle:
    /// `"v1.<hex(nonce || ciphertext || tag)>"`.
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Handle, AegixError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(&nonce, plaintext)
            .map_err(|e| AegixError::SecurityError(format!("encrypt failed: {e}")))?;
        let mut payload = Vec::with_capacity(nonce.len() + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(Handle(format!("{HANDLE_VERSION}.{}", hex::encode(payload))))
    }

    /// Encrypt a `u128` amount (e.g. a session's cumulative spend) alongside
    /// its declared bit `width`, so the paired attested-integer-decrypt can
    /// reject a handle whose stored width no longer matches what the caller
    /// expects instead of silently reinterpreting truncated bytes.
    pub fn encrypt_integer(&self, value: u128, width: u32) -> Result<Handle, AegixError> {
        let mut buf = Vec::with_capacity(4 + 16);
        buf.extend_from_slice(&width.to_le_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
        self.encrypt_bytes(&buf)
    }

    /// Owner-attested decrypt of a handle produced by `encrypt_integer`.
    /// Always returns an attestation proof string alongside the value, even
    /// in `Simulation` mode with no real ZK/FHE backend configured, so
    /// downstream code never has to branch on backend mode to get a proof
    /// it can record in the audit log.
    pub fn decrypt_integer_attested(
        &self,
        handle: &Handle,
        owner: &Address,
        signature_bytes: &[u8],
        agent_id: Option<&str>,
    ) -> Result<(u128, u32, String), AegixError> {
        let plaintext = self.decrypt_attested(handle, owner, signature_bytes, agent_id)?;
        if plaintext.len() != 20 {
            return Err(AegixError::InvalidHandleFormat(handle.0.clone()));
        }
        let mut width_bytes = [0u8; 4];
        width_bytes.copy_from_slice(&plaintext[..4]);
        let width = u32::from_le_bytes(width_bytes);
        let mut value_bytes = [0u8; 16];
        value_bytes.copy_from_slice(&plaintext[4..20]);
        let value = u128::from_le_bytes(value_bytes);

        let mut proof_input = owner.as_bytes().to_vec();
        proof_input.extend_from_slice(handle.0.as_bytes());
        proof_input.extend_from_slice(&value.to_le_bytes());
        let attestation_proof = format!("sim-attestation:{}", hex::encode(blake3_hash(&proof_input)));
        Ok((value, width, attestation_proof))
    }

    /// Decrypt without an ownership check. Used only internally, e.g. by
    /// `PaymentEngine` reading its own previously encrypted staging data, or
    /// by `KeyVault` when signing on behalf of an already-authenticated caller.
    pub fn decrypt_bytes(&self, handle: &Handle) -> Result<Vec<u8>, AegixError> {
        let (version, hex_payload) = handle
            .0
            .split_once('.')
            .ok_or_else(|| AegixError::InvalidHandleFormat(handle.0.clone()))?;
        if version != HANDLE_VERSION {
            return Err(AegixError::InvalidHandleFormat(handle.0.clone()));
        }
        let payload = hex::decode(hex_payload)
            .map_err(|e| AegixError::InvalidHandleFormat(format!("{e}")))?;
        if payload.len() < 24 {
            return Err(AegixError::InvalidHandleFormat(handle.0.clone()));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(24);
        let nonce = XNonce::from_slice(nonce_bytes);
        self.cipher()
            .decrypt(nonce, ciphertext)
            .map_err(|_| AegixError::SecurityError("decrypt failed: bad key or tampered ciphertext".into()))
    }

    /// Owner-attested decrypt: the caller must supply an Ed25519 signature
    /// over `decrypt:<handle>` signed by `owner`, binding the decrypt to a
    /// specific request rather than trusting caller identity alone.
    ///
    /// `agent_id`, when present, scopes the decrypt to an autonomous agent
    /// acting on the owner's behalf: the call only proceeds if that agent's
    /// status is externally reported as `Active`. This build has no
    /// agent-status backend wired in, so status can never be resolved —
    /// per the fail-closed rule, any `Some(agent_id)` is rejected outright
    /// rather than treated as implicitly active.
    pub fn decrypt_attested(
        &self,
        handle: &Handle,
        owner: &Address,
        signature_bytes: &[u8],
        agent_id: Option<&str>,
    ) -> Result<Vec<u8>, AegixError> {
        let challenge = decrypt_message(&handle.0);
        verify_signature(owner, challenge.as_bytes(), signature_bytes)?;
        self.require_active_agent(agent_id)?;
        self.decrypt_bytes(handle)
    }

    fn require_active_agent(&self, agent_id: Option<&str>) -> Result<(), AegixError> {
        match agent_id {
            None => Ok(()),
            Some(id) => Err(AegixError::PermissionDenied(format!(
                "cannot resolve status for agent {id}: no agent-status backend configured"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let store = CipherStore::new([7u8; 32]);
        let handle = store.encrypt_bytes(b"a pool's secret key").unwrap();
        let plaintext = store.decrypt_bytes(&handle).unwrap();
        assert_eq!(plaintext, b"a pool's secret key");
    }

    #[test]
    fn wrong_key_fails() {
        let store_a = CipherStore::new([1u8; 32]);
        let store_b = CipherStore::new([2u8; 32]);
        let handle = store_a.encrypt_bytes(b"secret").unwrap();
        assert!(store_b.decrypt_bytes(&handle).is_err());
    }

    #[test]
    fn malformed_handle_rejected() {
        let store = CipherStore::new([3u8; 32]);
        let bad = Handle("not-a-handle".to_string());
        assert!(store.decrypt_bytes(&bad).is_err());
    }

    #[test]
    fn attested_decrypt_requires_valid_signature() {
        use crate::keypair::KeyPair;
        let store = CipherStore::new([9u8; 32]);
        let handle = store.encrypt_bytes(b"top secret").unwrap();
        let owner = KeyPair::generate();
        let bogus_sig = [0u8; 64];
        assert!(store
            .decrypt_attested(&handle, &owner.address, &bogus_sig, None)
            .is_err());

        let challenge = decrypt_message(&handle.0);
        let sig = owner.sign(challenge.as_bytes());
        let plaintext = store
            .decrypt_attested(&handle, &owner.address, &sig.to_bytes(), None)
            .unwrap();
        assert_eq!(plaintext, b"top secret");
    }

    #[test]
    fn attested_decrypt_fails_closed_for_any_agent_id() {
        use crate::keypair::KeyPair;
        let store = CipherStore::new([11u8; 32]);
        let handle = store.encrypt_bytes(b"agent-scoped secret").unwrap();
        let owner = KeyPair::generate();
        let challenge = decrypt_message(&handle.0);
        let sig = owner.sign(challenge.as_bytes());

        let err = store
            .decrypt_attested(&handle, &owner.address, &sig.to_bytes(), Some("agent-1"))
            .unwrap_err();
        assert!(matches!(err, AegixError::PermissionDenied(_)));
    }

    #[test]
    fn integer_round_trip_with_attestation() {
        use crate::keypair::KeyPair;
        let store = CipherStore::new([13u8; 32]);
        let owner = KeyPair::generate();
        let handle = store.encrypt_integer(42_000, 64).unwrap();

        let challenge = decrypt_message(&handle.0);
        let sig = owner.sign(challenge.as_bytes());
        let (value, width, proof) = store
            .decrypt_integer_attested(&handle, &owner.address, &sig.to_bytes(), None)
            .unwrap();
        assert_eq!(value, 42_000);
        assert_eq!(width, 64);
        assert!(!proof.is_empty());
    }
}
