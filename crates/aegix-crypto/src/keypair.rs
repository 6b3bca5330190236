use aegix_core::Address;
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey, Signature};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// An Aegix keypair: Ed25519 signing + verifying key, with the ledger
/// address equal to the raw verifying key bytes (matching a Solana-family
/// ledger, where an account's address *is* its public key).
///
/// The secret key is held in a `Zeroizing<[u8; 32]>` to wipe memory on drop.
#[derive(Serialize, Deserialize)]
pub struct KeyPair {
    pub address: Address,
    secret_key: Zeroizing<[u8; 32]>,
}

impl KeyPair {
    /// Generate a fresh Ed25519 keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let address = Address::from_bytes(signing_key.verifying_key().to_bytes());
        Self {
            address,
            secret_key: Zeroizing::new(signing_key.to_bytes()),
        }
    }

    /// Restore a keypair from a raw 32-byte Ed25519 secret key (e.g. loaded
    /// from `KeyVault` via `CipherStore::decrypt_bytes`).
    pub fn from_secret_bytes(secret_key: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret_key);
        let address = Address::from_bytes(signing_key.verifying_key().to_bytes());
        Self {
            address,
            secret_key: Zeroizing::new(secret_key),
        }
    }

    /// Sign `message` using this keypair's secret key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signing_key = SigningKey::from_bytes(&self.secret_key);
        signing_key.sign(message)
    }

    /// Read-only view of the secret key bytes, used only at the signing /
    /// encrypt-for-storage call site — never logged.
    pub fn secret_key_bytes(&self) -> &[u8; 32] {
        &self.secret_key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey::from_bytes(self.address.as_bytes()).expect("address is a valid verifying key")
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {:?} }}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::generate();
        let msg = b"AEGIX_POOL_AUTH::owner::1700000000";
        let sig = kp.sign(msg);
        assert!(kp.verifying_key().verify_strict(msg, &sig).is_ok());
    }

    #[test]
    fn restored_keypair_matches_address() {
        let kp = KeyPair::generate();
        let secret = *kp.secret_key_bytes();
        let restored = KeyPair::from_secret_bytes(secret);
        assert_eq!(kp.address, restored.address);
    }
}
