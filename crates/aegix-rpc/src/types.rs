use serde::{Deserialize, Serialize};

use aegix_chain::UnsignedTx;
use aegix_core::ShortfallDetail;

/// Hex-encoded `bincode(UnsignedTx)`, the same wire convention
/// `SignedTx::to_wire_bytes` uses once the caller has signed it. The caller
/// decodes this, signs `UnsignedTx::signing_bytes()`, and either submits
/// directly to the ledger (`pool.fund`/`pool.top_up`/`recovery.create_and_fund`,
/// which fund a server-held address from the caller's own wallet) or returns
/// the signature through a confirm/pay call.
pub fn encode_unsigned_tx(tx: &UnsignedTx) -> String {
    hex::encode(bincode::serialize(tx).expect("UnsignedTx always serializes"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolInitResponse {
    pub pool_id: String,
    pub pool_address: String,
    pub is_new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolGetResponse {
    pub pool_id: String,
    pub pool_address: String,
    pub status: String,
    pub balance: String,
    pub needs_reauth: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolFundResponse {
    pub unsigned_tx: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfirmFundingResponse {
    pub balance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolTopUpResponse {
    pub unsigned_tx: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolWithdrawResponse {
    pub tx_signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolShieldResponse {
    pub tx_signature: String,
    pub compressed_balance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolPayResponse {
    pub session_id: String,
    pub tx_signature: String,
    pub method: String,
    pub privacy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub method: String,
    pub recipient: String,
    pub amount_micro: String,
    pub status: String,
    pub current_state: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolExportKeyResponse {
    pub private_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionKeyDescriptor {
    pub session_id: String,
    pub pool_id: String,
    pub daily_limit_micro: String,
    pub max_per_tx: String,
    pub granted_at: i64,
    pub expires_at: i64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedSummary {
    pub session_id: String,
    pub recorded_at: i64,
    /// `CipherStore` handle for this entry. The caller builds
    /// `"decrypt:{payload_handle}"`, signs it, and passes the signature to
    /// `audit.decrypt` to reveal the session.
    pub payload_handle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetails {
    pub session_id: String,
    pub pool_id: String,
    pub method: String,
    pub recipient: String,
    pub amount_micro: String,
    pub status: String,
    pub current_state: String,
    pub tx_signatures: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStatusResponse {
    pub address: Option<String>,
    pub balance: String,
    pub is_healthy: bool,
    pub is_locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryCreateAndFundResponse {
    pub address: String,
    pub unsigned_tx: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortfallDetailDto {
    pub have: String,
    pub required: String,
    pub shortfall: String,
}

impl From<ShortfallDetail> for ShortfallDetailDto {
    fn from(s: ShortfallDetail) -> Self {
        Self {
            have: s.have.to_string(),
            required: s.required.to_string(),
            shortfall: s.shortfall.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryValidateResponse {
    pub can_execute_payment: bool,
    pub shortfall: Option<ShortfallDetailDto>,
}
