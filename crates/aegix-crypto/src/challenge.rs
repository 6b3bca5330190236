//! Domain-separated challenge messages an owner signs to authorize
//! sensitive operations. Each prefix is unique to its operation so a
//! signature collected for one purpose can never be replayed for another.

/// Unlocking a pool / proving ownership for most mutating calls.
pub fn pool_auth_message(owner: &str, timestamp: i64) -> String {
    format!("AEGIX_POOL_AUTH::{owner}::{timestamp}")
}

/// Owner-attested decrypt of a `CipherStore` handle.
pub fn decrypt_message(handle: &str) -> String {
    format!("decrypt:{handle}")
}

/// Exporting a pool's raw secret key (`pool.export_key`).
pub fn export_key_message(owner: &str, timestamp: i64) -> String {
    format!("AEGIX_EXPORT_KEY::{owner}::{timestamp}")
}

/// Deleting an audit-log entry (`audit.delete`). Distinct from the decrypt
/// challenge so a caller who can read an entry cannot also erase it.
pub fn audit_delete_message(owner: &str, session_id: &str, timestamp: i64) -> String {
    format!("AEGIX_AUDIT_DELETE::{owner}::{session_id}::{timestamp}")
}

/// Granting a scoped session key (`session.create`). Binds `max_per_tx`
/// alongside `daily_limit_micro` so a caller cannot widen the per-transaction
/// cap after the owner has signed off on a narrower one.
pub fn session_grant_message(
    owner: &str,
    pool_id: &str,
    daily_limit_micro: u128,
    max_per_tx: u128,
    expires_at: i64,
) -> String {
    format!("AEGIX_SESSION_GRANT::{owner}::{pool_id}::{daily_limit_micro}::{max_per_tx}::{expires_at}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_domain_separated() {
        let a = pool_auth_message("owner1", 100);
        let b = export_key_message("owner1", 100);
        assert_ne!(a, b);
    }
}
