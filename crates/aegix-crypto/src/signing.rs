use aegix_core::{AegixError, Address};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Verify a detached Ed25519 signature over `message`, produced by the
/// holder of `signer`.
pub fn verify_signature(
    signer: &Address,
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), AegixError> {
    let verifying_key = VerifyingKey::from_bytes(signer.as_bytes())
        .map_err(|e| AegixError::SecurityError(format!("invalid public key: {e}")))?;
    let signature = Signature::from_slice(signature_bytes)
        .map_err(|_| AegixError::InvalidSignature {
            challenge: hex::encode(message),
        })?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| AegixError::InvalidSignature {
            challenge: String::from_utf8_lossy(message).to_string(),
        })
}
