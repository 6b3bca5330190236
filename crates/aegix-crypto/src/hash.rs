/// Compute BLAKE3 hash of arbitrary bytes → 32-byte array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Derive a burner's `proof_hash`: BLAKE3 over the domain-separated tuple
/// `"AEGIX_BURNER_PROOF" || payment_session_id || burner_address`, binding a
/// burner to the single payment session that requested it so it can never be
/// silently replayed into an unrelated payment.
pub fn burner_proof_hash(payment_session_id: &str, burner_address: &[u8; 32]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(19 + payment_session_id.len() + 32);
    buf.extend_from_slice(b"AEGIX_BURNER_PROOF");
    buf.extend_from_slice(payment_session_id.as_bytes());
    buf.extend_from_slice(burner_address);
    blake3_hash(&buf)
}
