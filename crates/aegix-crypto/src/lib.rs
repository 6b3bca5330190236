pub mod challenge;
pub mod cipher;
pub mod hash;
pub mod keypair;
pub mod signing;

pub use challenge::{
    audit_delete_message, decrypt_message, export_key_message, pool_auth_message, session_grant_message,
};
pub use cipher::CipherStore;
pub use hash::{blake3_hash, burner_proof_hash};
pub use keypair::KeyPair;
pub use signing::verify_signature;
